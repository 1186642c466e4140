//! Account/secret pairs used to log into the managed systems.
//!
//! Secrets are handed out for the duration of one operation and never stored
//! by the engine itself.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Mutex;

use crate::error::OpsErr;
use crate::error::Result;
use crate::jobs::JobOwner;

const ENV_PREFIX: &str = "OPSDESK";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account: String,
    secret: String,
}

impl Credentials {
    /// Both halves are trimmed; an empty half is rejected.
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let account = account.into().trim().to_string();
        let secret = secret.into().trim().to_string();
        if account.is_empty() || secret.is_empty() {
            return Err(OpsErr::Credentials(
                "account or password is not configured".to_string(),
            ));
        }
        Ok(Self { account, secret })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"***")
            .finish()
    }
}

pub trait CredentialStore: Send + Sync {
    /// Credentials `owner` uses for `system` (e.g. `vpn`, `vpn_firewall`).
    fn lookup(&self, owner: &JobOwner, system: &str) -> Result<Credentials>;
}

/// Reads `OPSDESK_<SYSTEM>_ACCOUNT` and `OPSDESK_<SYSTEM>_SECRET`.
///
/// The same pair is shared by every owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn account_var(system: &str) -> String {
        format!("{ENV_PREFIX}_{}_ACCOUNT", env_key(system))
    }

    pub fn secret_var(system: &str) -> String {
        format!("{ENV_PREFIX}_{}_SECRET", env_key(system))
    }
}

impl CredentialStore for EnvCredentialStore {
    fn lookup(&self, _owner: &JobOwner, system: &str) -> Result<Credentials> {
        let account_var = Self::account_var(system);
        let secret_var = Self::secret_var(system);
        let account = env::var(&account_var).unwrap_or_default();
        let secret = env::var(&secret_var).unwrap_or_default();
        Credentials::new(account, secret).map_err(|_| {
            OpsErr::Credentials(format!("set {account_var} and {secret_var} for system `{system}`"))
        })
    }
}

fn env_key(system: &str) -> String {
    system
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// In-process store, mostly for tests and embedding.
///
/// Owner-specific entries win over shared ones.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<(Option<i64>, String), Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_shared(&self, system: &str, credentials: Credentials) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((None, system.to_string()), credentials);
        }
    }

    pub fn insert_for(&self, owner: &JobOwner, system: &str, credentials: Credentials) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((Some(owner.id), system.to_string()), credentials);
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, owner: &JobOwner, system: &str) -> Result<Credentials> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| OpsErr::Credentials("credential store is unavailable".to_string()))?;
        entries
            .get(&(Some(owner.id), system.to_string()))
            .or_else(|| entries.get(&(None, system.to_string())))
            .cloned()
            .ok_or_else(|| OpsErr::Credentials(format!("no credentials for system `{system}`")))
    }
}
