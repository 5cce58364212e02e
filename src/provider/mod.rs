//! The node provider: the external collaborator that owns node lifecycle,
//! IP assignment and tag storage.

pub mod local;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::runner::{CommandRunner, CommandRunnerArgs};

pub use local::StaticNodeProvider;

pub type NodeTags = HashMap<String, String>;

#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// The node's internal or external IP, once assigned.
    async fn node_ip(
        &self,
        node_id: &str,
        internal: bool,
    ) -> Result<Option<String>, ProviderError>;

    async fn is_terminated(&self, node_id: &str) -> Result<bool, ProviderError>;

    async fn node_tags(&self, node_id: &str) -> Result<NodeTags, ProviderError>;

    /// Merge `tags` into the node's tags. All entries of one call must become
    /// visible together.
    async fn set_node_tags(&self, node_id: &str, tags: NodeTags) -> Result<(), ProviderError>;

    /// Build the transport used to reach `args.node_id`.
    fn command_runner(&self, args: CommandRunnerArgs) -> Box<dyn CommandRunner>;
}
