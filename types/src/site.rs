use serde::{Deserialize, Serialize};

use crate::server::Server;

/// `(account-id, domain)` — domain is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteId {
    pub account_id: String,
    pub domain: String,
}

impl SiteId {
    pub fn new(account_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            domain: domain.into(),
        }
    }
}

/// Lifecycle states of a `Site`. The state is derived from the multiset of
/// active operations (see `orc_group`); it is never set directly by a
/// caller outside the Operation Group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    NotInstalled,
    Installing,
    Active,
    Expanding,
    Shrinking,
    Updating,
    UpdatingEnviron,
    UpdatingConfig,
    GarbageCollecting,
    Degraded,
    Uninstalling,
}

impl ClusterState {
    pub fn allows_new_active_only_operation(self) -> bool {
        matches!(self, ClusterState::Active)
    }

    pub fn allows_degraded_tolerant_operation(self) -> bool {
        matches!(self, ClusterState::Active | ClusterState::Degraded)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    pub nameservers: Vec<String>,
    pub search: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    pub storage_driver: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub state: ClusterState,
    pub license: Option<String>,
    pub service_uid: u32,
    pub service_gid: u32,
    pub dns: DnsConfig,
    /// Ordered sequence of `Server`; unique by `hostname` (enforced by the
    /// Operation Group's `addClusterStateServers`).
    pub cluster_state_servers: Vec<Server>,
    pub docker: DockerConfig,
    pub provider: Option<String>,
    pub application_ref: Option<String>,
    pub vpc_cidr: Option<String>,
    pub machines_subnet: Option<String>,
    pub overlay_subnet: Option<String>,
    pub service_subnet: Option<String>,
    pub last_status_check_failed: bool,
}

impl Site {
    pub fn new(id: SiteId) -> Self {
        Self {
            id,
            state: ClusterState::NotInstalled,
            license: None,
            service_uid: 1000,
            service_gid: 1000,
            dns: DnsConfig::default(),
            cluster_state_servers: Vec::new(),
            docker: DockerConfig::default(),
            provider: None,
            application_ref: None,
            vpc_cidr: None,
            machines_subnet: None,
            overlay_subnet: None,
            service_subnet: None,
            last_status_check_failed: false,
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.provider.as_deref().is_some_and(|p| p != "onprem")
    }

    pub fn master_count(&self) -> usize {
        self.cluster_state_servers
            .iter()
            .filter(|s| s.cluster_role == crate::server::ClusterRole::Master)
            .count()
    }

    pub fn has_server(&self, hostname: &str) -> bool {
        self.cluster_state_servers
            .iter()
            .any(|s| s.hostname == hostname)
    }
}
