//! In-memory provider over a fixed node inventory.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{NodeEntry, Transport};
use crate::error::ProviderError;
use crate::runner::{CommandRunner, CommandRunnerArgs, build_command_runner};

use super::{NodeProvider, NodeTags};

#[derive(Debug, Clone)]
struct NodeState {
    external_ip: Option<String>,
    internal_ip: Option<String>,
    terminated: bool,
    tags: NodeTags,
}

/// Provider for nodes that already exist and have known addresses.
///
/// Tags live in memory for the lifetime of the provider.
pub struct StaticNodeProvider {
    nodes: Mutex<HashMap<String, NodeState>>,
    transport: Transport,
}

impl StaticNodeProvider {
    pub fn new(nodes: Vec<NodeEntry>, transport: Transport) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|entry| {
                let state = NodeState {
                    external_ip: entry.external_ip,
                    internal_ip: entry.internal_ip,
                    terminated: false,
                    tags: entry.tags,
                };
                (entry.id, state)
            })
            .collect();
        Self {
            nodes: Mutex::new(nodes),
            transport,
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Mark a node as gone; waits on it stop at their next poll.
    pub fn terminate(&self, node_id: &str) {
        if let Some(state) = self.nodes.lock().get_mut(node_id) {
            state.terminated = true;
        }
    }

    /// Assign an IP after construction, as a cloud would once a node boots.
    pub fn assign_ip(&self, node_id: &str, ip: &str, internal: bool) {
        if let Some(state) = self.nodes.lock().get_mut(node_id) {
            if internal {
                state.internal_ip = Some(ip.to_string());
            } else {
                state.external_ip = Some(ip.to_string());
            }
        }
    }

    fn unknown(node_id: &str) -> ProviderError {
        ProviderError(format!("unknown node '{}'", node_id))
    }
}

#[async_trait]
impl NodeProvider for StaticNodeProvider {
    async fn node_ip(
        &self,
        node_id: &str,
        internal: bool,
    ) -> Result<Option<String>, ProviderError> {
        let nodes = self.nodes.lock();
        let state = nodes.get(node_id).ok_or_else(|| Self::unknown(node_id))?;
        Ok(if internal {
            state.internal_ip.clone()
        } else {
            state.external_ip.clone()
        })
    }

    async fn is_terminated(&self, node_id: &str) -> Result<bool, ProviderError> {
        // A node missing from the inventory is as good as terminated.
        Ok(self
            .nodes
            .lock()
            .get(node_id)
            .is_none_or(|state| state.terminated))
    }

    async fn node_tags(&self, node_id: &str) -> Result<NodeTags, ProviderError> {
        let nodes = self.nodes.lock();
        let state = nodes.get(node_id).ok_or_else(|| Self::unknown(node_id))?;
        Ok(state.tags.clone())
    }

    async fn set_node_tags(&self, node_id: &str, tags: NodeTags) -> Result<(), ProviderError> {
        let mut nodes = self.nodes.lock();
        let state = nodes.get_mut(node_id).ok_or_else(|| Self::unknown(node_id))?;
        state.tags.extend(tags);
        Ok(())
    }

    fn command_runner(&self, args: CommandRunnerArgs) -> Box<dyn CommandRunner> {
        build_command_runner(&self.transport, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ip: Option<&str>) -> NodeEntry {
        NodeEntry {
            id: id.to_string(),
            external_ip: ip.map(str::to_string),
            internal_ip: None,
            tags: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn resolves_ips_by_policy() {
        let provider = StaticNodeProvider::new(vec![node("a", Some("1.2.3.4"))], Transport::Ssh);
        assert_eq!(
            provider.node_ip("a", false).await.unwrap().as_deref(),
            Some("1.2.3.4")
        );
        assert_eq!(provider.node_ip("a", true).await.unwrap(), None);

        provider.assign_ip("a", "10.0.0.4", true);
        assert_eq!(
            provider.node_ip("a", true).await.unwrap().as_deref(),
            Some("10.0.0.4")
        );
        assert!(provider.node_ip("missing", false).await.is_err());
    }

    #[tokio::test]
    async fn tags_merge() {
        let provider = StaticNodeProvider::new(vec![node("a", None)], Transport::Ssh);
        let mut first = NodeTags::new();
        first.insert("x".into(), "1".into());
        first.insert("y".into(), "1".into());
        provider.set_node_tags("a", first).await.unwrap();

        let mut second = NodeTags::new();
        second.insert("y".into(), "2".into());
        provider.set_node_tags("a", second).await.unwrap();

        let tags = provider.node_tags("a").await.unwrap();
        assert_eq!(tags.get("x").map(String::as_str), Some("1"));
        assert_eq!(tags.get("y").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn terminate_and_unknown_nodes() {
        let provider =
            StaticNodeProvider::new(vec![node("a", None), node("b", None)], Transport::Ssh);
        assert!(!provider.is_terminated("a").await.unwrap());
        provider.terminate("a");
        assert!(provider.is_terminated("a").await.unwrap());
        assert!(!provider.is_terminated("b").await.unwrap());
        assert!(provider.is_terminated("ghost").await.unwrap());
        assert_eq!(provider.node_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
