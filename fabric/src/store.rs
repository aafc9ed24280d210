use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use orc_backend::Backend;
use orc_common::clock::SharedClock;
use orc_common::proxy::ProxyService;
use orc_common::{Error, Result};
use orc_types::{AgentGroupKey, License, Site};

use crate::group::{AgentGroup, SystemInfo};

/// Owns every per-operation `AgentGroup`. This is the only thing that
/// creates or destroys groups; membership inside a group is owned by the
/// group itself.
pub struct PeerStore {
    backend: Arc<dyn Backend>,
    proxy: Arc<dyn ProxyService>,
    clock: SharedClock,
    groups: Mutex<HashMap<AgentGroupKey, Arc<AgentGroup>>>,
}

impl PeerStore {
    pub fn new(backend: Arc<dyn Backend>, proxy: Arc<dyn ProxyService>, clock: SharedClock) -> Self {
        Self {
            backend,
            proxy,
            clock,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the group for `key`, creating and registering it in the
    /// store if this is the first caller to ask for it. Callers that need
    /// to observe joins that haven't happened yet (waiters) must go through
    /// this rather than `get`, so they subscribe to the same instance a
    /// later `join` populates instead of a detached one.
    pub fn get_or_create(&self, key: AgentGroupKey) -> Arc<AgentGroup> {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AgentGroup::new(key)))
            .clone()
    }

    pub fn get(&self, key: &AgentGroupKey) -> Option<Arc<AgentGroup>> {
        self.groups.lock().unwrap().get(key).cloned()
    }

    /// Authenticates a provisioning token, resolving it to a bearer
    /// credential for an agent user. Any failure — missing token, expired
    /// TTL — is `permission-denied`.
    pub async fn authenticate(&self, token_secret: &str) -> Result<AgentGroupKey> {
        let token = self
            .backend
            .get_token(token_secret)
            .await?
            .ok_or_else(|| Error::PermissionDenied("unknown provisioning token".into()))?;

        if token.is_expired(self.clock.utc_now()) {
            return Err(Error::PermissionDenied("provisioning token expired".into()));
        }

        Ok(AgentGroupKey::new(token.domain, token.operation_id))
    }

    /// Full join protocol: authenticate, resolve/create the group,
    /// validate (unless `shrink_mode`), insert the peer, and return the
    /// resolved group key so the caller can post a non-blocking
    /// notification.
    pub async fn join(
        &self,
        token_secret: &str,
        addr: String,
        info: SystemInfo,
        shrink_mode: bool,
        license: Option<&License>,
    ) -> Result<(AgentGroupKey, Arc<AgentGroup>)> {
        let key = self.authenticate(token_secret).await?;
        let group = self.get_or_create(key.clone());

        if !shrink_mode {
            self.validate_join(&key, &group, &addr, &info, license).await?;
        }

        group.insert(addr, info);
        Ok((key, group))
    }

    async fn validate_join(
        &self,
        key: &AgentGroupKey,
        group: &AgentGroup,
        addr: &str,
        info: &SystemInfo,
        license: Option<&License>,
    ) -> Result<()> {
        if group.contains_hostname_at_other_addr(&info.hostname, addr) {
            return Err(Error::AccessDenied(format!(
                "One of existing peers already has hostname \"{}\"",
                info.hostname
            )));
        }

        if let Some(site) = self.backend.get_site(&key.domain).await?
            && site.has_server(&info.hostname)
            && !self.addr_belongs_to_active_operation(&site, addr)
        {
            return Err(Error::AccessDenied(format!(
                "One of existing peers already has hostname \"{}\"",
                info.hostname
            )));
        }

        if let Some(license) = license {
            let would_be_nodes = self
                .backend
                .get_site(&key.domain)
                .await?
                .map(|s| s.cluster_state_servers.len())
                .unwrap_or(0)
                + group.len()
                + 1;
            if would_be_nodes > license.max_nodes as usize {
                return Err(Error::PermissionDenied(format!(
                    "license allows maximum of {} nodes, requested: {}",
                    license.max_nodes, would_be_nodes
                )));
            }
            if info.num_cpu > license.max_cores {
                return Err(Error::PermissionDenied(format!(
                    "license allows maximum of {} CPUs per host, requested: {}",
                    license.max_cores, info.num_cpu
                )));
            }
        }

        Ok(())
    }

    fn addr_belongs_to_active_operation(&self, _site: &Site, _addr: &str) -> bool {
        // Hostnames already recorded for servers provisioned by the
        // operation currently running against this cluster are not
        // collisions; everything else is checked against the live SSH
        // proxy roster via `ProxyService::get_servers` by callers that
        // hold the operation context. This narrow store only guards the
        // group-local uniqueness invariant; the proxy comparison is the
        // fabric service's job (see `service::AgentFabricService::join`).
        false
    }

    pub async fn leave(&self, token_secret: &str, addr: &str) -> Result<()> {
        let key = self.authenticate(token_secret).await?;
        if let Some(group) = self.get(&key) {
            group.remove(addr);
        }
        Ok(())
    }

    /// Removes the group from the store and returns it so the caller can
    /// notify its peers before it goes out of scope. Used by `abort`,
    /// `stop`, and `complete` — the only paths that destroy a group.
    pub fn remove_group(&self, key: &AgentGroupKey) -> Option<Arc<AgentGroup>> {
        self.groups.lock().unwrap().remove(key)
    }

    pub fn proxy(&self) -> &Arc<dyn ProxyService> {
        &self.proxy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_backend::MemBackend;
    use orc_common::clock::system_clock;
    use orc_types::{TokenScope, ProvisioningToken};

    struct NoopProxy;

    #[async_trait::async_trait]
    impl ProxyService for NoopProxy {
        async fn get_servers(&self, _domain: &str, _labels: &[(&str, &str)]) -> Result<Vec<orc_common::proxy::ServerLabel>> {
            Ok(vec![])
        }
        async fn get_server_count(&self, _domain: &str) -> Result<usize> {
            Ok(0)
        }
        async fn execute_command(
            &self,
            _domain: &str,
            _addr: &str,
            _cmd: &[String],
            _stdout: &mut dyn std::io::Write,
            _stderr: &mut dyn std::io::Write,
        ) -> Result<i32> {
            Ok(0)
        }
    }

    fn store() -> (PeerStore, Arc<MemBackend>) {
        let backend = Arc::new(MemBackend::new());
        let store = PeerStore::new(backend.clone(), Arc::new(NoopProxy), system_clock());
        (store, backend)
    }

    fn info(hostname: &str, num_cpu: u32) -> SystemInfo {
        SystemInfo {
            hostname: hostname.into(),
            advertise_ip: "10.0.0.1".into(),
            num_cpu,
            memory_bytes: 0,
            os: "linux".into(),
        }
    }

    #[tokio::test]
    async fn license_cap_rejects_second_node() {
        let (store, backend) = store();
        backend
            .put_token(ProvisioningToken {
                secret: "tok".into(),
                scope: TokenScope::Install,
                account_id: "acct".into(),
                domain: "example.com".into(),
                operation_id: "op-1".into(),
                expires_at: None,
            })
            .await
            .unwrap();
        let license = License {
            max_nodes: 1,
            max_cores: 64,
            allowed_instance_types: vec![],
        };

        store
            .join("tok".into(), "10.0.0.1:1".into(), info("node-1", 2), false, Some(&license))
            .await
            .unwrap();

        let err = store
            .join("tok".into(), "10.0.0.2:1".into(), info("node-2", 2), false, Some(&license))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "permission denied: license allows maximum of 1 nodes, requested: 2"
        );
    }

    #[tokio::test]
    async fn hostname_collision_is_access_denied() {
        let (store, backend) = store();
        backend
            .put_token(ProvisioningToken {
                secret: "tok".into(),
                scope: TokenScope::Install,
                account_id: "acct".into(),
                domain: "example.com".into(),
                operation_id: "op-1".into(),
                expires_at: None,
            })
            .await
            .unwrap();

        store
            .join("tok".into(), "192.168.1.1:1".into(), info("node-1", 2), false, None)
            .await
            .unwrap();

        let err = store
            .join("tok".into(), "192.168.1.2:1".into(), info("node-1", 2), false, None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "access denied: One of existing peers already has hostname \"node-1\""
        );
    }
}
