use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanPhaseState {
    Unstarted,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub id: String,
    pub state: PlanPhaseState,
}

/// Ordered collection of upgrade phases. Used only by the upgrade
/// admission check to decide whether a failed upgrade has been fully
/// rolled back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationPlan {
    pub phases: Vec<PlanPhase>,
}

impl OperationPlan {
    /// A plan is fully rolled back when every phase that ever left
    /// `Unstarted` ended in `RolledBack`.
    pub fn is_fully_rolled_back(&self) -> bool {
        self.phases.iter().all(|p| {
            matches!(p.state, PlanPhaseState::Unstarted | PlanPhaseState::RolledBack)
        })
    }

    pub fn has_unrolled_back_failure(&self) -> bool {
        self.phases
            .iter()
            .any(|p| matches!(p.state, PlanPhaseState::Failed))
    }
}
