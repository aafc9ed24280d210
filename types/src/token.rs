use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenScope {
    Install,
    Expand,
    Shrink,
}

/// Authenticates every agent of one operation. `install`-scoped tokens never
/// expire server-side until the operation terminates; `expand`-scoped
/// tokens carry a TTL enforced by the fabric at join time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningToken {
    pub secret: String,
    pub scope: TokenScope,
    pub account_id: String,
    pub domain: String,
    pub operation_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProvisioningToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.scope {
            TokenScope::Install => false,
            TokenScope::Expand | TokenScope::Shrink => {
                self.expires_at.is_some_and(|exp| now >= exp)
            }
        }
    }
}
