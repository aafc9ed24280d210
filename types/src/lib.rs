pub mod agent_group;
pub mod license;
pub mod operation;
pub mod plan;
pub mod progress;
pub mod server;
pub mod site;
pub mod token;

pub use agent_group::AgentGroupKey;
pub use license::License;
pub use operation::{
    ExpandPayload, InstallPayload, OperationPayload, OperationState, OperationType,
    ShrinkPayload, SiteOperation, UninstallPayload, UpdateConfigPayload, UpdatePayload,
    UpdateRuntimeEnvPayload,
};
pub use plan::{OperationPlan, PlanPhase, PlanPhaseState};
pub use progress::{ProgressEntry, ProgressState};
pub use server::{ClusterRole, ExpandPolicy, Mount, Profile, Server};
pub use site::{ClusterState, Site, SiteId};
pub use token::{ProvisioningToken, TokenScope};
