//! Account management on the VPN appliance's command shell.
//!
//! Every operation logs in with the caller's appliance credentials and
//! drives the `aaaa user user ...` command family through [`RemoteShell`].

use std::sync::Arc;

use tracing::debug;

use crate::credentials::Credentials;
use crate::error::Result;
use crate::operation::OperationReport;
use crate::progress::Progress;
use crate::remote_shell::RemoteShell;
use crate::remote_shell::ShellConnector;
use crate::remote_shell::ShellTiming;

mod classify;
mod delete;
pub mod listing;
mod params;
mod users;

pub use delete::DeleteOutcome;
pub use listing::VpnUser;
pub use listing::parse_listing;
pub use params::AddUser;
pub use params::DeleteUsers;
pub use params::ModifyPassword;
pub use params::ModifyStatus;
pub use params::SearchUser;
pub use params::UserSelector;
pub use params::VpnRequest;
pub use params::random_password;

/// Credential-store key for the appliance itself.
pub const APPLIANCE_SYSTEM: &str = "vpn";
/// Credential-store key for the firewall that mirrors VPN accounts.
pub const FIREWALL_SYSTEM: &str = "vpn_firewall";

/// One appliance reachable with a fixed set of credentials.
#[derive(Clone)]
pub struct ApplianceTarget {
    connector: Arc<dyn ShellConnector>,
    credentials: Credentials,
    timing: ShellTiming,
}

impl ApplianceTarget {
    pub fn new(connector: Arc<dyn ShellConnector>, credentials: Credentials, timing: ShellTiming) -> Self {
        Self {
            connector,
            credentials,
            timing,
        }
    }

    /// Log in again and wrap the new session in a driver.
    pub(crate) async fn open(&self) -> Result<RemoteShell> {
        let session = self.connector.connect(&self.credentials).await?;
        Ok(RemoteShell::new(session, self.timing.clone()))
    }

    /// Run one command on a session of its own.
    pub(crate) async fn run_once(&self, command: &str) -> Result<String> {
        let shell = self.open().await?;
        let result = shell.run(command).await;
        shell.close().await;
        Ok(result?)
    }
}

/// Whether deletions can be mirrored to the firewall.
#[derive(Clone)]
pub enum FirewallAccess {
    Ready(ApplianceTarget),
    /// Reported per item; never fails the job.
    Unavailable(String),
}

#[derive(Clone)]
pub struct VpnContext {
    pub appliance: ApplianceTarget,
    pub firewall: Option<FirewallAccess>,
}

impl VpnContext {
    pub fn new(appliance: ApplianceTarget) -> Self {
        Self {
            appliance,
            firewall: None,
        }
    }

    pub fn with_firewall(mut self, firewall: FirewallAccess) -> Self {
        self.firewall = Some(firewall);
        self
    }
}

pub async fn execute(ctx: VpnContext, request: VpnRequest, progress: Progress) -> Result<OperationReport> {
    debug!(operation = request.operation_name(), "running vpn operation");
    match request {
        VpnRequest::AddUser(req) => users::add_user(&ctx, req).await,
        VpnRequest::SearchUser(req) => users::search_user(&ctx, req, &progress).await,
        VpnRequest::ModifyPassword(req) => users::modify_password(&ctx, req).await,
        VpnRequest::ModifyStatus(req) => users::modify_status(&ctx, req).await,
        VpnRequest::DeleteUsers(req) => delete::delete_users(&ctx, req, &progress).await,
    }
}
