use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::Server;
use crate::site::ClusterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Install,
    Expand,
    Shrink,
    Uninstall,
    Update,
    UpdateRuntimeEnv,
    UpdateConfig,
    GarbageCollect,
    Reconfigure,
}

impl OperationType {
    /// At most one active operation of these types per cluster (§3).
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            OperationType::Install
                | OperationType::Uninstall
                | OperationType::Update
                | OperationType::UpdateConfig
                | OperationType::UpdateRuntimeEnv
                | OperationType::Reconfigure
        )
    }

    pub fn allows_degraded_admission(self) -> bool {
        matches!(
            self,
            OperationType::Shrink | OperationType::GarbageCollect | OperationType::UpdateRuntimeEnv
        )
    }

    /// The cluster state assigned while this operation type is in progress.
    pub fn in_progress_cluster_state(self) -> ClusterState {
        match self {
            OperationType::Install => ClusterState::Installing,
            OperationType::Expand => ClusterState::Expanding,
            OperationType::Shrink => ClusterState::Shrinking,
            OperationType::Uninstall => ClusterState::Uninstalling,
            OperationType::Update => ClusterState::Updating,
            OperationType::UpdateRuntimeEnv => ClusterState::UpdatingEnviron,
            OperationType::UpdateConfig => ClusterState::UpdatingConfig,
            OperationType::GarbageCollect => ClusterState::GarbageCollecting,
            OperationType::Reconfigure => ClusterState::Updating,
        }
    }
}

/// Per-type state machine states, collapsed into one enum for storage
/// simplicity; `SiteOperation::is_finished` is the authority on which
/// states are terminal, not the variant name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    InstallInitiated,
    InstallPrechecks,
    InstallProvisioning,
    InstallDeploying,
    ExpandInitiated,
    ExpandPrechecks,
    ExpandProvisioning,
    ExpandReady,
    ShrinkInProgress,
    UninstallInProgress,
    UpdateInProgress,
    UpdateRuntimeEnvInProgress,
    UpdateConfigInProgress,
    GarbageCollectInProgress,
    ReconfigureInProgress,
    Completed,
    Failed,
    RolledBack,
}

impl OperationState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::RolledBack
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallPayload {
    pub provisioning_token: Option<String>,
    pub num_servers: u32,
    pub overlay_subnet: Option<String>,
    pub service_subnet: Option<String>,
    pub agent_joining_urls: Vec<String>,
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpandPayload {
    pub provisioning_token: Option<String>,
    pub num_servers: u32,
    pub adds_master: bool,
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShrinkPayload {
    pub hostname: String,
    pub force: bool,
    pub node_was_offline: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UninstallPayload {
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRuntimeEnvPayload {
    pub previous_env: std::collections::BTreeMap<String, String>,
    pub new_env: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfigPayload {
    pub previous_config: String,
    pub new_config: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub from_version: String,
    pub to_version: String,
    pub via_intermediate: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationPayload {
    Install(InstallPayload),
    Expand(ExpandPayload),
    Shrink(ShrinkPayload),
    Uninstall(UninstallPayload),
    Update(UpdatePayload),
    UpdateRuntimeEnv(UpdateRuntimeEnvPayload),
    UpdateConfig(UpdateConfigPayload),
    GarbageCollect,
    Reconfigure,
}

/// Identity: `(account-id, domain, operation-id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteOperation {
    pub account_id: String,
    pub domain: String,
    pub operation_id: String,
    pub op_type: OperationType,
    pub state: OperationState,
    pub provisioner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload: OperationPayload,
    /// Set when a `force` admission bypass was used to create this op.
    pub force: bool,
}

impl SiteOperation {
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn is_active(&self) -> bool {
        !self.is_finished()
    }

    /// Cluster state to write when this operation reaches a terminal state
    /// and no sibling operation of the same type remains active.
    pub fn cluster_state(&self) -> ClusterState {
        match self.state {
            OperationState::Failed if self.op_type == OperationType::Install => {
                ClusterState::NotInstalled
            }
            _ => ClusterState::Active,
        }
    }
}
