use serde::{Deserialize, Serialize};

/// Key identifying one per-operation peer group in the Agent Peer Fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentGroupKey {
    pub domain: String,
    pub operation_id: String,
}

impl AgentGroupKey {
    pub fn new(domain: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            operation_id: operation_id.into(),
        }
    }
}
