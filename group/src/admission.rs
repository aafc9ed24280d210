use orc_common::{Error, Result};
use orc_types::{ClusterState, OperationPlan, OperationType, SiteOperation};

#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    pub max_expand_concurrency: usize,
    pub max_master_nodes: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            max_expand_concurrency: 3,
            max_master_nodes: 3,
        }
    }
}

/// Evaluates the admission table in the Operation Group's contract.
/// Returns `Ok(())` when `candidate` may be created given `cluster_state`,
/// the cluster's current `master_count`, the set of `active` operations
/// already on the cluster, and — for upgrades — the plan of the most
/// recent `update` operation.
pub fn check_admission(
    cluster_state: ClusterState,
    master_count: usize,
    active: &[SiteOperation],
    candidate: &SiteOperation,
    last_update_plan: Option<&OperationPlan>,
    config: &GroupConfig,
) -> Result<()> {
    match candidate.op_type {
        OperationType::Install => {
            require_state(cluster_state, &[ClusterState::NotInstalled])
        }
        OperationType::Uninstall | OperationType::Reconfigure => Ok(()),
        OperationType::Expand => check_expand_admission(cluster_state, master_count, active, candidate, config),
        OperationType::Shrink | OperationType::GarbageCollect | OperationType::UpdateRuntimeEnv => {
            require_state(cluster_state, &[ClusterState::Active, ClusterState::Degraded])
        }
        OperationType::Update => check_update_admission(cluster_state, candidate, last_update_plan),
        OperationType::UpdateConfig => require_state(cluster_state, &[ClusterState::Active]),
    }
}

fn require_state(state: ClusterState, allowed: &[ClusterState]) -> Result<()> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(Error::CompareFailed(format!(
            "cluster is in state {state:?}, expected one of {allowed:?}"
        )))
    }
}

fn check_expand_admission(
    cluster_state: ClusterState,
    master_count: usize,
    active: &[SiteOperation],
    candidate: &SiteOperation,
    config: &GroupConfig,
) -> Result<()> {
    if !matches!(cluster_state, ClusterState::Active | ClusterState::Expanding) {
        return Err(Error::CompareFailed(format!(
            "cluster is in state {cluster_state:?}, expand requires Active or Expanding"
        )));
    }

    let active_expands: Vec<&SiteOperation> = active
        .iter()
        .filter(|op| op.op_type == OperationType::Expand)
        .collect();

    if active_expands.len() >= config.max_expand_concurrency {
        return Err(Error::CompareFailed(format!(
            "at most {} nodes can be joining simultaneously",
            config.max_expand_concurrency
        )));
    }

    let candidate_adds_master = expand_adds_master(candidate);
    let any_active_adds_master = active_expands.iter().any(|op| expand_adds_master(op));

    if any_active_adds_master {
        return Err(Error::CompareFailed(
            "an expand adding a master is already in progress".into(),
        ));
    }

    if candidate_adds_master {
        if !active_expands.is_empty() {
            return Err(Error::CompareFailed(
                "expand adding a master must be the sole active expand".into(),
            ));
        }
        if master_count >= config.max_master_nodes {
            return Err(Error::CompareFailed(format!(
                "cluster already has {master_count} masters, max is {}",
                config.max_master_nodes
            )));
        }
    }

    Ok(())
}

fn expand_adds_master(op: &SiteOperation) -> bool {
    matches!(
        &op.payload,
        orc_types::OperationPayload::Expand(p) if p.adds_master
    )
}

fn check_update_admission(
    cluster_state: ClusterState,
    candidate: &SiteOperation,
    last_update_plan: Option<&OperationPlan>,
) -> Result<()> {
    require_state(cluster_state, &[ClusterState::Active])?;

    if candidate.force {
        return Ok(());
    }

    match last_update_plan {
        None => Ok(()),
        Some(plan) if plan.is_fully_rolled_back() => Ok(()),
        Some(_) => Err(Error::CompareFailed(
            "previous update's plan isn't fully rolled back".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orc_types::{ExpandPayload, OperationPayload, OperationState};

    fn op(op_type: OperationType, state: OperationState, adds_master: bool) -> SiteOperation {
        SiteOperation {
            account_id: "acct".into(),
            domain: "example.com".into(),
            operation_id: uuid::Uuid::new_v4().to_string(),
            op_type,
            state,
            provisioner: "onprem".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            payload: if op_type == OperationType::Expand {
                OperationPayload::Expand(ExpandPayload {
                    adds_master,
                    ..Default::default()
                })
            } else {
                OperationPayload::GarbageCollect
            },
            force: false,
        }
    }

    #[test]
    fn expand_requires_compatible_state() {
        let candidate = op(OperationType::Expand, OperationState::ExpandInitiated, false);
        let err = check_admission(
            ClusterState::NotInstalled,
            0,
            &[],
            &candidate,
            None,
            &GroupConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_compare_failed());
    }

    #[test]
    fn expand_max_concurrency() {
        let config = GroupConfig {
            max_expand_concurrency: 2,
            ..Default::default()
        };
        let active = vec![
            op(OperationType::Expand, OperationState::ExpandProvisioning, false),
            op(OperationType::Expand, OperationState::ExpandProvisioning, false),
        ];
        let candidate = op(OperationType::Expand, OperationState::ExpandInitiated, false);
        let err = check_admission(ClusterState::Active, 1, &active, &candidate, None, &config)
            .unwrap_err();
        assert!(err.to_string().contains("2 nodes can be joining"));
    }

    #[test]
    fn master_expand_is_single_writer() {
        let active = vec![op(OperationType::Expand, OperationState::ExpandProvisioning, false)];
        let candidate = op(OperationType::Expand, OperationState::ExpandInitiated, true);
        let err = check_admission(
            ClusterState::Active,
            1,
            &active,
            &candidate,
            None,
            &GroupConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_compare_failed());
    }

    #[test]
    fn active_master_expand_blocks_new_expands() {
        let active = vec![op(OperationType::Expand, OperationState::ExpandProvisioning, true)];
        let candidate = op(OperationType::Expand, OperationState::ExpandInitiated, false);
        let err = check_admission(
            ClusterState::Active,
            2,
            &active,
            &candidate,
            None,
            &GroupConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_compare_failed());
    }

    #[test]
    fn update_with_unrolled_back_failure_requires_force() {
        let plan = OperationPlan {
            phases: vec![orc_types::PlanPhase {
                id: "phase-1".into(),
                state: orc_types::PlanPhaseState::Failed,
            }],
        };
        let mut candidate = op(OperationType::Update, OperationState::UpdateInProgress, false);
        let err = check_admission(
            ClusterState::Active,
            1,
            &[],
            &candidate,
            Some(&plan),
            &GroupConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("plan isn't fully rolled back"));

        candidate.force = true;
        check_admission(
            ClusterState::Active,
            1,
            &[],
            &candidate,
            Some(&plan),
            &GroupConfig::default(),
        )
        .unwrap();
    }
}
