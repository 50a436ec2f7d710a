pub mod app;
pub mod commands;
pub mod common;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
