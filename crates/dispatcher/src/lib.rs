//! 调度循环
//!
//! 每个检查周期读取调度存储的当前快照，计算到期任务并交给执行器。
//! 同一任务同一时刻最多只有一个触发在运行，全局并发由信号量限制。

pub mod scheduler;

pub use scheduler::{TaskScheduler, TickReport, TriggerResult};
