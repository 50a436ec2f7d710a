pub mod child;
pub mod executor_factory;
pub mod executors;
pub mod runner;

pub use child::exec_builtin;
pub use executor_factory::{ExecutorFactory, EXEC_BUILTIN_SUBCOMMAND};
pub use executors::{
    AttemptContext, AttemptExecutor, AttemptOutcome, ProcessExecutor, ThreadExecutor,
};
pub use runner::TaskRunner;
