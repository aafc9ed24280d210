use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterRole {
    Master,
    Node,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mount {
    pub name: String,
    pub source_path: String,
    pub target_path: String,
}

/// A node participating in (or about to join) a cluster. `advertise_ip` is
/// unique within a cluster; `cluster_role` is assigned exactly once, during
/// role assignment ahead of admission (see `orc_drivers::install::assign_roles`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub hostname: String,
    pub advertise_ip: String,
    /// Profile name, e.g. "node" or "master" from the application manifest.
    pub role: String,
    pub cluster_role: ClusterRole,
    pub instance_id: Option<String>,
    pub instance_type: Option<String>,
    pub mounts: Vec<Mount>,
    pub os_user: String,
    pub num_cpu: u32,
}

impl Server {
    pub fn new(hostname: impl Into<String>, advertise_ip: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            advertise_ip: advertise_ip.into(),
            role: role.into(),
            cluster_role: ClusterRole::Node,
            instance_id: None,
            instance_type: None,
            mounts: Vec::new(),
            os_user: "planet".to_string(),
            num_cpu: 1,
        }
    }
}

/// Expand policy recorded on an application-manifest profile; fixed-instance
/// profiles may only be expanded with the instance type recorded at install
/// time (see `orc_drivers::expand::validate_expand`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpandPolicy {
    Fixed,
    Unlimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub count: Option<u32>,
    pub expand_policy: ExpandPolicy,
    pub is_master: bool,
}
