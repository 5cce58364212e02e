pub mod paths;
pub mod plan;
pub mod settings;

pub use plan::{AuthConfig, DockerConfig, NodeEntry, Transport, UpdatePlan};
pub use settings::{Timeouts, UpdaterSettings};
