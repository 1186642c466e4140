use tracing::debug;

use super::VpnContext;
use super::classify::CODE_PASSWORD_TOO_SHORT;
use super::classify::CODE_SAME_PASSWORD;
use super::classify::CODE_USER_NOT_FOUND;
use super::classify::looks_like_error;
use super::classify::user_exists;
use super::listing::clean_description;
use super::listing::invalid_flag;
use super::listing::parse_listing;
use super::listing::status_label;
use super::params::AddUser;
use super::params::ModifyPassword;
use super::params::ModifyStatus;
use super::params::SearchUser;
use super::params::UserSelector;
use crate::error::OpsErr;
use crate::error::Result;
use crate::operation::OperationReport;
use crate::progress::Progress;

const USER_NOT_FOUND: &str = "user not found";
const MAX_REPLY_EXCERPT: usize = 200;

/// Error-looking output that carries none of the codes we know.
fn unrecognized_reply(operation: &str, out: &str) -> OpsErr {
    let line = out
        .lines()
        .map(str::trim)
        .find(|line| looks_like_error(line))
        .unwrap_or_else(|| out.trim());
    let excerpt: String = line.chars().take(MAX_REPLY_EXCERPT).collect();
    OpsErr::Protocol(format!("{operation}: {excerpt}"))
}

fn search_command(description: &str) -> String {
    format!(
        "aaaa user user search key-word description show-type page key-value '{}'",
        clean_description(description)
    )
}

pub(super) async fn add_user(ctx: &VpnContext, req: AddUser) -> Result<OperationReport> {
    const FAILED: &str = "add user failed";
    let command = format!(
        "aaaa user user add name {} invalid {} group {} passwd {} description '{}' mail {} inherit-role yes",
        req.vpn_user,
        invalid_flag(req.enabled),
        req.group,
        req.password,
        clean_description(&req.description),
        req.mail,
    );
    let out = ctx.appliance.run_once(&command).await?;
    if user_exists(&out) {
        return Err(OpsErr::rejected(FAILED, "user already exists"));
    }
    if looks_like_error(&out) {
        return Err(unrecognized_reply("add user", &out));
    }

    Ok(OperationReport::new("user added")
        .with_log_text(format!("user: {}\ninitial password: {}", req.vpn_user, req.password))
        .with_detail("vpn_user", req.vpn_user)
        .with_detail("group", req.group))
}

pub(super) async fn search_user(ctx: &VpnContext, req: SearchUser, progress: &Progress) -> Result<OperationReport> {
    let out = ctx.appliance.run_once(&search_command(&req.description)).await?;
    if looks_like_error(&out) && !out.contains("name") {
        return Err(unrecognized_reply("search user", &out));
    }

    let users = parse_listing(&out);
    if users.is_empty() {
        return Ok(OperationReport::new("no records found")
            .with_log_text("no VPN account matches this description")
            .with_detail("raw", out));
    }

    let total = users.len();
    let mut entries = Vec::with_capacity(total);
    for (i, user) in users.iter().enumerate() {
        let entry = user.log_entry();
        progress.emit(&entry, i + 1, total);
        entries.push(entry);
    }
    Ok(OperationReport::new(format!("found {total} record(s)"))
        .with_log_text(entries.join("\n\n"))
        .with_items(&users)
        .with_detail("raw", out))
}

/// Account name for `target`; a description is looked up on the appliance.
async fn resolve_user(ctx: &VpnContext, target: &UserSelector, failure: &str) -> Result<String> {
    let description = match target {
        UserSelector::Name(name) => return Ok(name.clone()),
        UserSelector::Description(description) => description,
    };
    let out = ctx.appliance.run_once(&search_command(description)).await?;
    let wanted = clean_description(description);
    let name = parse_listing(&out)
        .into_iter()
        .find(|user| user.description == wanted)
        .map(|user| user.name)
        .ok_or_else(|| OpsErr::rejected(failure, "no user matches the description"))?;
    debug!(%name, "resolved vpn user by description");
    Ok(name)
}

pub(super) async fn modify_password(ctx: &VpnContext, req: ModifyPassword) -> Result<OperationReport> {
    const FAILED: &str = "modify password failed";
    let name = resolve_user(ctx, &req.target, FAILED).await?;
    let command = format!(
        "aaaa user user modify-info passwd {} index-key name index-value {name}",
        req.password
    );
    let out = ctx.appliance.run_once(&command).await?;
    if out.contains(CODE_USER_NOT_FOUND) {
        return Err(OpsErr::rejected(FAILED, USER_NOT_FOUND));
    }
    if out.contains(CODE_SAME_PASSWORD) {
        return Err(OpsErr::rejected(FAILED, "new password equals the old one"));
    }
    if out.contains(CODE_PASSWORD_TOO_SHORT) {
        return Err(OpsErr::rejected(FAILED, "password is shorter than 8 characters"));
    }
    if looks_like_error(&out) {
        return Err(unrecognized_reply("modify password", &out));
    }

    Ok(OperationReport::new("password changed")
        .with_log_text(format!("user: {name}\nnew password: {}", req.password))
        .with_detail("vpn_user", name))
}

pub(super) async fn modify_status(ctx: &VpnContext, req: ModifyStatus) -> Result<OperationReport> {
    const FAILED: &str = "modify status failed";
    let name = resolve_user(ctx, &req.target, FAILED).await?;
    let command = format!(
        "aaaa user user modify-info invalid {} index-key name index-value {name}",
        invalid_flag(req.enabled)
    );
    let out = ctx.appliance.run_once(&command).await?;
    if out.contains(CODE_USER_NOT_FOUND) {
        return Err(OpsErr::rejected(FAILED, USER_NOT_FOUND));
    }
    if looks_like_error(&out) {
        return Err(unrecognized_reply("modify status", &out));
    }

    let status = status_label(req.enabled);
    Ok(OperationReport::new("status changed")
        .with_log_text(format!("user: {name}\nstatus: {status}"))
        .with_detail("vpn_user", name)
        .with_detail("status", status))
}
