pub mod builtin;
pub mod catalog;
pub mod discovery;
pub mod generation;
pub mod manifest;
pub mod registry;

pub use catalog::WorkUnitCatalog;
pub use discovery::TaskDiscovery;
pub use generation::{DiscoveryWarning, Generation};
pub use manifest::{ExecuteSpec, TaskManifest};
pub use registry::Registry;
