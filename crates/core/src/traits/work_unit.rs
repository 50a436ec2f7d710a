//! 工作单元接口定义
//!
//! 工作单元是任务的实际业务逻辑：接收一个配置映射，返回结果映射或失败。
//! 接口是同步的，由执行器放入独立的执行单元 (线程或子进程) 中运行，
//! 超时由执行器强制终止，工作单元无需响应取消信号。
//!
//! ## 使用示例
//!
//! ```rust
//! use taskd_core::traits::{TaskConfig, TaskOutput, WorkUnit};
//!
//! struct Greeter;
//!
//! impl WorkUnit for Greeter {
//!     fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput> {
//!         let who = config
//!             .get("who")
//!             .and_then(|v| v.as_str())
//!             .unwrap_or("world");
//!         let mut output = TaskOutput::new();
//!         output.insert("greeting".to_string(), format!("hello {who}").into());
//!         Ok(output)
//!     }
//! }
//!
//! let output = Greeter.execute(&TaskConfig::new()).unwrap();
//! assert_eq!(output["greeting"], "hello world");
//! ```

use serde_json::{Map, Value};

/// 传递给工作单元的任务配置
pub type TaskConfig = Map<String, Value>;

/// 工作单元成功时返回的结果
pub type TaskOutput = Map<String, Value>;

/// 工作单元接口
pub trait WorkUnit: Send + Sync {
    /// 使用给定配置执行一次
    fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput>;
}

impl<F> WorkUnit for F
where
    F: Fn(&TaskConfig) -> anyhow::Result<TaskOutput> + Send + Sync,
{
    fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput> {
        self(config)
    }
}
