//! Credentials captured from the host page's own traffic.

use serde::{Deserialize, Serialize};

/// Values needed to call the upstream API on the user's behalf.
///
/// Populated opportunistically; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// GraphQL operation id for the account-about query.
    pub query_id: Option<String>,
    /// Value of the `authorization` header.
    pub bearer_token: Option<String>,
    /// Session CSRF token (the `ct0` cookie); absent when logged out.
    pub csrf_token: Option<String>,
}

impl Credentials {
    /// Query id and bearer token are both known.
    pub fn is_ready(&self) -> bool {
        self.query_id.is_some() && self.bearer_token.is_some()
    }

    /// Merge newly observed values; fields not observed are left as they were.
    /// Returns true if anything changed.
    pub fn merge(&mut self, update: Credentials) -> bool {
        let mut changed = false;
        for (slot, new) in [
            (&mut self.query_id, update.query_id),
            (&mut self.bearer_token, update.bearer_token),
            (&mut self.csrf_token, update.csrf_token),
        ] {
            if let Some(value) = new.filter(|v| !v.is_empty()) {
                if slot.as_deref() != Some(value.as_str()) {
                    *slot = Some(value);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Mask a secret for display, keeping a short prefix.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    if secret.chars().count() <= 6 {
        "*".repeat(secret.chars().count())
    } else {
        format!("{}…", prefix)
    }
}
