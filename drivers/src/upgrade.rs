use std::sync::Arc;

use orc_common::{Error, Result};
use orc_runner::CommandRunner;
use orc_types::{
    OperationPayload, OperationState, OperationType, ProgressState, SiteOperation, UpdatePayload,
};
use semver::Version;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::version::{UpgradeDecision, VersionPolicy};
use crate::{run_scoped, DriverDeps};

/// Everything about the target manifest that must match the current one,
/// beyond the runtime version itself.
pub struct ManifestCompatibility<'a> {
    pub current_profile_names: &'a [String],
    pub new_profile_names: &'a [String],
    pub current_network_type: &'a str,
    pub new_network_type: &'a str,
    pub current_docker_storage_driver: &'a str,
    pub new_docker_storage_driver: &'a str,
    pub supported_storage_drivers: &'a [String],
    pub persistent_storage_currently_enabled: bool,
    pub persistent_storage_requested_enabled: bool,
}

/// Ordered admission checks ahead of runtime-version compatibility: every
/// profile in the current manifest must survive into the new one, the
/// network type may not change, a docker storage-driver change must land on
/// a supported driver, and persistent storage may not be turned off.
pub fn check_manifest_compatibility(m: &ManifestCompatibility) -> Result<()> {
    for name in m.current_profile_names {
        if !m.new_profile_names.contains(name) {
            return Err(Error::BadParameter(format!(
                "update manifest drops existing profile {name}"
            )));
        }
    }

    if m.current_network_type != m.new_network_type {
        return Err(Error::BadParameter(
            "network type cannot change during an upgrade".into(),
        ));
    }

    if m.current_docker_storage_driver != m.new_docker_storage_driver
        && !m.supported_storage_drivers.contains(&m.new_docker_storage_driver.to_string())
    {
        return Err(Error::BadParameter(format!(
            "docker storage driver {} is not a supported upgrade target",
            m.new_docker_storage_driver
        )));
    }

    if m.persistent_storage_currently_enabled && !m.persistent_storage_requested_enabled {
        return Err(Error::BadParameter(
            "persistent storage cannot be disabled during an upgrade".into(),
        ));
    }

    Ok(())
}

pub struct UpgradeDriver {
    deps: DriverDeps,
    policy: VersionPolicy,
}

impl UpgradeDriver {
    pub fn new(deps: DriverDeps, policy: VersionPolicy) -> Self {
        Self { deps, policy }
    }

    /// `createUpdateOperation`: runs the ordered admission checks, then
    /// admits the operation. The cluster must already be `Active`, which the
    /// group's own admission rules enforce on `create`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        from: &Version,
        to: &Version,
        available_runtime_packages: &[Version],
        manifest: &ManifestCompatibility<'_>,
    ) -> Result<SiteOperation> {
        check_manifest_compatibility(manifest)?;

        let decision = self
            .policy
            .check_upgrade_path(from, to, available_runtime_packages)
            .map_err(|e| Error::BadParameter(e.to_string()))?;

        let via_intermediate = match decision {
            UpgradeDecision::Direct => None,
            UpgradeDecision::Via { required_intermediates } => Some(required_intermediates),
        };

        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::Update,
            state: OperationState::UpdateInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Update(UpdatePayload {
                from_version: from.to_string(),
                to_version: to.to_string(),
                via_intermediate,
            }),
            force: false,
        };

        let op = self.deps.group.create(op).await?;
        self.deps
            .audit
            .emit("operation.created", domain, &op.operation_id, "Update");
        Ok(op)
    }

    /// Deploys upgrade agents on the leader node over the given runner
    /// (typically an SSH-backed `ProxyRunner`). Any failure after this point
    /// resets the cluster to `Active` and marks the operation `Failed`, same
    /// as the compare-and-swap terminal path computes by default.
    pub async fn run(
        &self,
        domain: &str,
        operation_id: &str,
        leader_runner: Arc<dyn CommandRunner>,
    ) -> Result<SiteOperation> {
        let ctx = OperationContext::open(
            self.deps.site_dir.clone(),
            domain.to_string(),
            operation_id.to_string(),
            None,
            self.deps.backend.clone(),
            self.deps.clock.clone(),
        )
        .await?;

        let domain = domain.to_string();
        let operation_id = operation_id.to_string();

        run_scoped(ctx, |ctx| async move {
            let result = self.deploy(ctx, &domain, &operation_id, leader_runner).await;
            if let Err(e) = &result {
                ctx.report_progress(ProgressState::Failed, 100, e.to_string()).await.ok();
                self.deps
                    .group
                    .compare_and_swap(&domain, &operation_id, &[], OperationState::Failed)
                    .await
                    .ok();
            }
            result
        })
        .await
    }

    async fn deploy(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
        leader_runner: Arc<dyn CommandRunner>,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 20, "deploying upgrade agents on leader")
            .await?;
        let output = leader_runner.run_cmd("orc-agent upgrade deploy".to_string()).await?;
        if !output.success() {
            return Err(Error::Other(anyhow::anyhow!(
                "upgrade agent deploy exited with code {}",
                output.exit_code
            )));
        }

        ctx.report_progress(ProgressState::Completed, 100, "upgrade complete").await?;
        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compat() -> (Vec<String>, Vec<String>) {
        (vec!["master".to_string(), "node".to_string()], vec!["master".to_string(), "node".to_string()])
    }

    #[test]
    fn rejects_dropped_profile() {
        let (current, _) = compat();
        let new = vec!["master".to_string()];
        let m = ManifestCompatibility {
            current_profile_names: &current,
            new_profile_names: &new,
            current_network_type: "wireguard",
            new_network_type: "wireguard",
            current_docker_storage_driver: "overlay2",
            new_docker_storage_driver: "overlay2",
            supported_storage_drivers: &[],
            persistent_storage_currently_enabled: true,
            persistent_storage_requested_enabled: true,
        };
        let err = check_manifest_compatibility(&m).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn rejects_network_type_change() {
        let (current, new) = compat();
        let m = ManifestCompatibility {
            current_profile_names: &current,
            new_profile_names: &new,
            current_network_type: "wireguard",
            new_network_type: "vxlan",
            current_docker_storage_driver: "overlay2",
            new_docker_storage_driver: "overlay2",
            supported_storage_drivers: &[],
            persistent_storage_currently_enabled: true,
            persistent_storage_requested_enabled: true,
        };
        let err = check_manifest_compatibility(&m).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn rejects_unsupported_storage_driver_change() {
        let (current, new) = compat();
        let supported = vec!["overlay2".to_string()];
        let m = ManifestCompatibility {
            current_profile_names: &current,
            new_profile_names: &new,
            current_network_type: "wireguard",
            new_network_type: "wireguard",
            current_docker_storage_driver: "overlay2",
            new_docker_storage_driver: "devicemapper",
            supported_storage_drivers: &supported,
            persistent_storage_currently_enabled: true,
            persistent_storage_requested_enabled: true,
        };
        let err = check_manifest_compatibility(&m).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn rejects_disabling_persistent_storage() {
        let (current, new) = compat();
        let m = ManifestCompatibility {
            current_profile_names: &current,
            new_profile_names: &new,
            current_network_type: "wireguard",
            new_network_type: "wireguard",
            current_docker_storage_driver: "overlay2",
            new_docker_storage_driver: "overlay2",
            supported_storage_drivers: &[],
            persistent_storage_currently_enabled: true,
            persistent_storage_requested_enabled: false,
        };
        let err = check_manifest_compatibility(&m).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn accepts_compatible_manifest() {
        let (current, new) = compat();
        let m = ManifestCompatibility {
            current_profile_names: &current,
            new_profile_names: &new,
            current_network_type: "wireguard",
            new_network_type: "wireguard",
            current_docker_storage_driver: "overlay2",
            new_docker_storage_driver: "overlay2",
            supported_storage_drivers: &[],
            persistent_storage_currently_enabled: true,
            persistent_storage_requested_enabled: true,
        };
        check_manifest_compatibility(&m).unwrap();
    }
}
