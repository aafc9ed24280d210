use std::time::Duration;

use orc_common::backoff::Backoff;
use orc_common::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::fanout::AgentClient;
use crate::group::SystemInfo;
use crate::proto::{JoinRequest, LeaveRequest};

/// Agent-side counterpart of `PeerStore::join`: dials the orchestrator's
/// fabric server, retrying with full-jitter backoff, and re-announces on
/// every reconnect. Runs for the lifetime of one provisioning attempt.
pub struct ReconnectingClient {
    fabric_addr: String,
    token: String,
    info: SystemInfo,
    shrink_mode: bool,
    backoff: Backoff,
}

impl ReconnectingClient {
    pub fn new(fabric_addr: String, token: String, info: SystemInfo, shrink_mode: bool) -> Self {
        Self {
            fabric_addr,
            token,
            info,
            shrink_mode,
            backoff: Backoff {
                base: Duration::from_millis(250),
                cap: Duration::from_secs(10),
                max_elapsed: None,
            },
        }
    }

    /// Connects and joins, retrying indefinitely until cancelled or a
    /// terminal error (bad token, license rejection) is returned.
    pub async fn connect_and_join(&self, cancel: &CancellationToken) -> Result<AgentClient> {
        self.backoff
            .retry(cancel, Self::should_reconnect, || async {
                let mut client = AgentClient::connect(self.fabric_addr.clone()).await?;
                client
                    .join(JoinRequest {
                        token: self.token.clone(),
                        addr: self.info.advertise_ip.clone(),
                        system_info: Some(crate::proto::SystemInfo {
                            hostname: self.info.hostname.clone(),
                            advertise_ip: self.info.advertise_ip.clone(),
                            num_cpu: self.info.num_cpu,
                            memory_bytes: self.info.memory_bytes,
                            os: self.info.os.clone(),
                        }),
                        config_vars: Default::default(),
                        shrink_mode: self.shrink_mode,
                    })
                    .await?;
                Ok(client)
            })
            .await
    }

    fn should_reconnect(err: &Error) -> bool {
        !matches!(
            err,
            Error::PermissionDenied(_) | Error::AccessDenied(_) | Error::LimitExceeded(_)
        )
    }

    pub async fn leave(&self, client: &mut AgentClient) -> Result<()> {
        client
            .leave(LeaveRequest {
                token: self.token.clone(),
                addr: self.info.advertise_ip.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_terminal() {
        assert!(!ReconnectingClient::should_reconnect(&Error::PermissionDenied("x".into())));
        assert!(ReconnectingClient::should_reconnect(&Error::Other(anyhow::anyhow!("transient"))));
    }
}
