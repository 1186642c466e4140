use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use super::ApplianceTarget;
use super::FirewallAccess;
use super::VpnContext;
use super::classify::DeleteVerdict;
use super::classify::classify_delete;
use super::params::DeleteUsers;
use crate::error::Result;
use crate::operation::OperationReport;
use crate::progress::Progress;
use crate::remote_shell::RemoteShell;

const FIREWALL_NOT_CONFIGURED: &str = "firewall credentials are not configured";

fn delete_command(user: &str) -> String {
    format!("aaaa user user delete index-key name index-value {user}")
}

/// Result of deleting one account on one appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub vpn_user: String,
    pub ok: bool,
    pub not_found: bool,
    pub output: String,
    pub error: String,
}

impl DeleteOutcome {
    fn from_output(user: &str, output: String, error: Option<String>) -> Self {
        let verdict = classify_delete(&output);
        Self {
            vpn_user: user.to_string(),
            ok: verdict == DeleteVerdict::Deleted,
            not_found: verdict == DeleteVerdict::NotFound,
            output,
            error: error.unwrap_or_default(),
        }
    }

    fn unreachable(user: &str, error: String) -> Self {
        Self {
            vpn_user: user.to_string(),
            ok: false,
            not_found: false,
            output: String::new(),
            error,
        }
    }

    fn log_line(&self) -> String {
        if self.ok {
            format!("user {} deleted", self.vpn_user)
        } else if self.not_found {
            format!("delete failed: user {} does not exist", self.vpn_user)
        } else {
            format!("delete failed: user {} could not be deleted", self.vpn_user)
        }
    }
}

pub(super) async fn delete_users(ctx: &VpnContext, req: DeleteUsers, progress: &Progress) -> Result<OperationReport> {
    let total = req.users.len();
    let mut shell = ctx.appliance.open().await?;
    let mut items = Vec::with_capacity(total);
    let mut logs = Vec::with_capacity(total);

    for (i, user) in req.users.iter().enumerate() {
        let outcome = delete_with_reconnect(&ctx.appliance, &mut shell, user).await;
        let line = outcome.log_line();
        progress.emit(&line, i + 1, total);
        logs.push(line);
        items.push(outcome);
    }
    shell.close().await;

    let deleted = items.iter().filter(|item| item.ok).count();
    info!(deleted, total, "vpn users deleted");
    let mut report = OperationReport::new(format!("deleted {deleted}/{total}"));

    if req.remote_firewall {
        let remote = replay_on_firewall(ctx.firewall.as_ref(), &req.users, progress).await;
        let remote_items: Vec<Value> = remote
            .items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();
        report = report
            .with_detail("remote_items", remote_items)
            .with_detail("remote_log_text", remote.logs.join("\n"));
        if let Some(error) = remote.error {
            report = report.with_detail("remote_error", error);
        }
        logs.extend(remote.logs);
    }

    Ok(report.with_log_text(logs.join("\n")).with_items(&items))
}

/// A dropped session gets exactly one fresh login and one retry.
async fn delete_with_reconnect(target: &ApplianceTarget, shell: &mut RemoteShell, user: &str) -> DeleteOutcome {
    let command = delete_command(user);
    let err = match shell.run(&command).await {
        Ok(output) => return DeleteOutcome::from_output(user, output, None),
        Err(err) => err,
    };
    warn!(user, error = %err, "vpn session failed; logging in again");
    let fresh = match target.open().await {
        Ok(fresh) => fresh,
        Err(reconnect) => return DeleteOutcome::unreachable(user, reconnect.to_string()),
    };
    let stale = std::mem::replace(shell, fresh);
    stale.close().await;
    match shell.run(&command).await {
        Ok(output) => DeleteOutcome::from_output(user, output, None),
        Err(err) => DeleteOutcome::from_output(user, String::new(), Some(err.to_string())),
    }
}

struct FirewallReplay {
    items: Vec<DeleteOutcome>,
    logs: Vec<String>,
    error: Option<String>,
}

async fn replay_on_firewall(access: Option<&FirewallAccess>, users: &[String], progress: &Progress) -> FirewallReplay {
    let total = users.len();
    let target = match access {
        Some(FirewallAccess::Ready(target)) => target,
        Some(FirewallAccess::Unavailable(reason)) => return firewall_unavailable(users, Some(reason.as_str()), progress),
        None => return firewall_unavailable(users, None, progress),
    };

    let mut logs = vec!["deleting VPN users on the firewall".to_string()];
    progress.emit(&logs[0], total, total);
    let shell = match target.open().await {
        Ok(shell) => shell,
        Err(err) => {
            warn!(error = %err, "firewall login failed");
            let line = "firewall login failed; check the account or access rights".to_string();
            progress.emit(&line, total, total);
            logs.push(line.clone());
            let items = users
                .iter()
                .map(|user| DeleteOutcome::unreachable(user, err.to_string()))
                .collect();
            return FirewallReplay {
                items,
                logs,
                error: Some(format!("{line}: {err}")),
            };
        }
    };

    let mut items = Vec::with_capacity(total);
    for user in users {
        let outcome = match shell.run(&delete_command(user)).await {
            Ok(output) => DeleteOutcome::from_output(user, output, None),
            Err(err) => DeleteOutcome::from_output(user, String::new(), Some(err.to_string())),
        };
        let line = format!("firewall: {}", outcome.log_line());
        progress.emit(&line, total, total);
        logs.push(line);
        items.push(outcome);
    }
    shell.close().await;
    FirewallReplay {
        items,
        logs,
        error: None,
    }
}

fn firewall_unavailable(users: &[String], reason: Option<&str>, progress: &Progress) -> FirewallReplay {
    let mut message = format!("{FIREWALL_NOT_CONFIGURED}; VPN accounts were not removed from the firewall");
    if let Some(reason) = reason.filter(|reason| !reason.trim().is_empty()) {
        message.push_str(&format!(" ({})", reason.trim()));
    }
    progress.emit(&message, users.len(), users.len());
    FirewallReplay {
        items: users
            .iter()
            .map(|user| DeleteOutcome::unreachable(user, FIREWALL_NOT_CONFIGURED.to_string()))
            .collect(),
        logs: vec![message.clone()],
        error: Some(message),
    }
}
