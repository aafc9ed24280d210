use std::collections::HashMap;
use std::sync::Mutex;

use orc_types::AgentGroupKey;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub hostname: String,
    pub advertise_ip: String,
    pub num_cpu: u32,
    pub memory_bytes: u64,
    pub os: String,
}

struct Inner {
    /// `(addr, hostname)` pairs; unique, and `hostname` is unique across
    /// all addresses within the group (enforced at join time, not here).
    peers: HashMap<String, SystemInfo>,
}

/// The set of peers connected for one `(domain, operation-id)`. Peer count
/// is published through a `watch` channel: `watch` always holds the latest
/// value and a receiver created before a join is guaranteed to observe it
/// via `changed()`, which is the non-blocking, nothing-lost property the
/// duplicating-broadcast pattern exists to provide elsewhere in this
/// codebase (see `orc_common::backoff`).
pub struct AgentGroup {
    pub key: AgentGroupKey,
    inner: Mutex<Inner>,
    count_tx: watch::Sender<usize>,
}

impl AgentGroup {
    pub fn new(key: AgentGroupKey) -> Self {
        let (count_tx, _rx) = watch::channel(0);
        Self {
            key,
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
            }),
            count_tx,
        }
    }

    pub fn contains_hostname_at_other_addr(&self, hostname: &str, addr: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .peers
            .iter()
            .any(|(a, info)| info.hostname == hostname && a != addr)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, addr: String, info: SystemInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.insert(addr, info);
        let _ = self.count_tx.send(inner.peers.len());
    }

    /// Never fails; dropping an absent mapping is a no-op.
    pub fn remove(&self, addr: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.remove(addr);
        let _ = self.count_tx.send(inner.peers.len());
    }

    pub fn peers(&self) -> Vec<(String, SystemInfo)> {
        let mut peers: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .peers
            .iter()
            .map(|(a, i)| (a.clone(), i.clone()))
            .collect();
        // Deterministic order for `getServerInfos` aggregation.
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_observes_joins_after_subscribe() {
        let group = std::sync::Arc::new(AgentGroup::new(AgentGroupKey::new("d", "op")));
        let mut rx = group.watch_count();

        let g2 = group.clone();
        let joiner = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            g2.insert(
                "10.0.0.1:1".into(),
                SystemInfo {
                    hostname: "node-1".into(),
                    advertise_ip: "10.0.0.1".into(),
                    num_cpu: 2,
                    memory_bytes: 0,
                    os: "linux".into(),
                },
            );
        });

        while *rx.borrow() < 1 {
            rx.changed().await.unwrap();
        }
        joiner.await.unwrap();
        assert_eq!(group.len(), 1);
    }
}
