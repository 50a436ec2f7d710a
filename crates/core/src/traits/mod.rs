pub mod work_unit;

pub use work_unit::{TaskConfig, TaskOutput, WorkUnit};
