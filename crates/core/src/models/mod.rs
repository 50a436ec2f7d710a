//! # 数据模型
//!
//! 调度引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! ### TaskDescriptor - 任务描述
//! 一个已发现任务的静态契约：限定名、分类、默认调度、默认超时与重试次数，
//! 以及执行方式 ([`TaskKind`])。注册后不可变。
//!
//! ### ScheduleEntry - 调度条目
//! 任务的有效运行配置，由持久化的覆盖项 ([`ScheduleOverride`]) 合并到
//! 任务描述的默认值之上得到。
//!
//! ### ExecutionRecord - 执行记录
//! 一次执行尝试的结果。同一次触发的多次重试共享 `firing_id`。
//!
//! ## 状态流转
//!
//! ```text
//! IDLE → DUE → RUNNING → IDLE
//!   ↑                      |
//!   +------ DISABLED ------+   (正交标志，短路调度判断)
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`。

pub mod execution;
pub mod schedule;
pub mod task;

pub use execution::*;
pub use schedule::*;
pub use task::*;
