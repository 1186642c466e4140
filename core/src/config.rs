//! Runtime configuration, read from an optional TOML file plus a couple of
//! environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::OpsErr;
use crate::error::Result;
use crate::jobs::JobStoreConfig;
use crate::remote_shell::ShellTiming;

pub const VPN_SSH_ADDR_ENV: &str = "VPN_SSH_ADDR";
pub const FIREWALL_SSH_ADDR_ENV: &str = "FIREWALL_SSH_ADDR";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_GROUP: &str = "default^root";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub vpn: VpnConfig,
    pub shell: ShellTiming,
    pub jobs: JobStoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    /// Host of the VPN appliance shell.
    pub ssh_addr: String,
    /// Host of the firewall that mirrors VPN accounts.
    pub firewall_addr: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Group paths the appliance knows about, e.g. `sales^root`.
    pub known_groups: Vec<String>,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            ssh_addr: String::new(),
            firewall_addr: String::new(),
            port: DEFAULT_SSH_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            known_groups: vec![DEFAULT_GROUP.to_string()],
        }
    }
}

impl VpnConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl OpsConfig {
    /// Read `path` when given (a missing file is an error), otherwise start
    /// from defaults; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|err| {
                    OpsErr::Config(format!("failed to read {}: {err}", path.display()))
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        debug!(vpn = %config.vpn.ssh_addr, firewall = %config.vpn.firewall_addr, "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| OpsErr::Config(err.to_string()))
    }

    /// Non-empty values returned by `lookup` replace the appliance addresses.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(addr) = non_empty(VPN_SSH_ADDR_ENV) {
            self.vpn.ssh_addr = addr;
        }
        if let Some(addr) = non_empty(FIREWALL_SSH_ADDR_ENV) {
            self.vpn.firewall_addr = addr;
        }
    }
}
