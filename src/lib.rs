//! Node updater library
//!
//! Brings freshly provisioned cluster nodes into a known-good running state:
//! waits for a node to accept remote commands, syncs files onto it, runs its
//! setup and start commands, and records the result in the node's tags.

pub mod config;
pub mod error;
pub mod log_timer;
pub mod logging;
pub mod process;
pub mod provider;
pub mod runner;
pub mod status;
pub mod updater;
pub mod worker;

pub use error::UpdateError;
pub use provider::NodeProvider;
pub use runner::CommandRunner;
pub use status::NodeStatus;
pub use updater::{NodeUpdater, UpdateRequest};
pub use worker::{UpdateExit, UpdateWorker, update_nodes};
