use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use opsdesk_core::AutomationService;
use opsdesk_core::JobOwner;
use opsdesk_core::JobView;
use opsdesk_core::OpsConfig;
use opsdesk_core::SystemTag;
use opsdesk_core::credentials::EnvCredentialStore;
use opsdesk_core::progress::ProgressSink;
use owo_colors::OwoColorize;
use serde_json::Value;
use serde_json::json;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
pub struct VpnCli {
    #[command(subcommand)]
    command: VpnCommand,
}

#[derive(Debug, Subcommand)]
enum VpnCommand {
    /// Create an account; a password is generated when none is given.
    AddUser(AddUserArgs),
    /// List accounts whose description matches.
    SearchUser {
        #[arg(long = "description", value_name = "TEXT")]
        description: String,
    },
    /// Set a new password, identifying the account by name or description.
    ModifyPassword {
        #[command(flatten)]
        target: TargetArgs,
        /// New password; generated when omitted.
        #[arg(long = "passwd", value_name = "PASSWORD")]
        passwd: Option<String>,
    },
    /// Enable or disable an account.
    ModifyStatus {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long = "status", value_enum, default_value_t = StatusArg::Enabled)]
        status: StatusArg,
    },
    /// Delete accounts; names may be separated by `,` `;` or `/`.
    DeleteUsers {
        #[arg(value_name = "USERS", required = true)]
        users: Vec<String>,
        /// Also remove the accounts from the firewall.
        #[arg(long = "remote-firewall", default_value_t = false)]
        remote_firewall: bool,
    },
}

#[derive(Debug, Args)]
struct AddUserArgs {
    #[arg(long = "user", value_name = "NAME")]
    user: String,
    /// Group (section) on the appliance; unknown groups fall back to the default.
    #[arg(long = "group", value_name = "GROUP", default_value = "")]
    group: String,
    #[arg(long = "passwd", value_name = "PASSWORD")]
    passwd: Option<String>,
    #[arg(long = "description", value_name = "TEXT")]
    description: String,
    #[arg(long = "mail", value_name = "ADDRESS")]
    mail: String,
    #[arg(long = "status", value_enum, default_value_t = StatusArg::Enabled)]
    status: StatusArg,
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long = "user", value_name = "NAME", required_unless_present = "description")]
    user: Option<String>,
    /// Resolve the account through an exact description match.
    #[arg(long = "description", value_name = "TEXT")]
    description: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Enabled,
    Disabled,
}

impl StatusArg {
    fn as_str(self) -> &'static str {
        match self {
            StatusArg::Enabled => "enabled",
            StatusArg::Disabled => "disabled",
        }
    }
}

impl VpnCommand {
    fn operation(&self) -> &'static str {
        match self {
            VpnCommand::AddUser(_) => "add_user",
            VpnCommand::SearchUser { .. } => "search_user",
            VpnCommand::ModifyPassword { .. } => "modify_password",
            VpnCommand::ModifyStatus { .. } => "modify_status",
            VpnCommand::DeleteUsers { .. } => "delete_users",
        }
    }

    fn params(&self) -> Value {
        match self {
            VpnCommand::AddUser(args) => json!({
                "vpn_user": args.user,
                "section": args.group,
                "passwd": args.passwd.clone().unwrap_or_default(),
                "description": args.description,
                "mail": args.mail,
                "status": args.status.as_str(),
            }),
            VpnCommand::SearchUser { description } => json!({ "description": description }),
            VpnCommand::ModifyPassword { target, passwd } => json!({
                "vpn_user": target.user.clone().unwrap_or_default(),
                "description": target.description.clone().unwrap_or_default(),
                "passwd": passwd.clone().unwrap_or_default(),
            }),
            VpnCommand::ModifyStatus { target, status } => json!({
                "vpn_user": target.user.clone().unwrap_or_default(),
                "description": target.description.clone().unwrap_or_default(),
                "status": status.as_str(),
            }),
            VpnCommand::DeleteUsers {
                users,
                remote_firewall,
            } => json!({
                "vpn_users": users.join(","),
                "remote_firewall": remote_firewall,
            }),
        }
    }
}

/// Prints progress lines to stderr as they arrive.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, line: &str, processed: usize, total: usize) {
        if total > 0 {
            eprintln!("[{processed}/{total}] {line}");
        } else {
            eprintln!("{line}");
        }
    }
}

pub async fn run(cli: VpnCli, config: OpsConfig, json_output: bool) -> Result<()> {
    let service = AutomationService::from_config(config, Arc::new(EnvCredentialStore))?;
    let owner = local_owner();
    let operation = cli.command.operation();
    let observer: Option<Arc<dyn ProgressSink>> = if json_output {
        None
    } else {
        Some(Arc::new(StderrProgress))
    };

    let id = service.submit(&owner, SystemTag::Vpn, operation, cli.command.params(), observer)?;
    tracing::debug!(job_id = %id, operation, "waiting for job");
    let view = wait(&service, &id, &owner).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }
    if !view.ok {
        bail!("{}: {}", view.message, view.error);
    }
    Ok(())
}

async fn wait(service: &AutomationService, id: &opsdesk_core::JobId, owner: &JobOwner) -> Result<JobView> {
    loop {
        let view = service
            .poll(id, owner)
            .ok_or_else(|| anyhow!("job {id} is no longer available"))?;
        if view.done {
            return Ok(view);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_view(view: &JobView) {
    if !view.result_text.is_empty() {
        println!("{}", view.result_text);
    }
    let colored = std::io::stdout().is_terminal();
    let headline = format!("{} {}: {}", view.system, view.operation, view.message);
    match (view.ok, colored) {
        (true, true) => println!("{}", headline.green()),
        (false, true) => println!("{}", headline.red()),
        _ => println!("{headline}"),
    }
}

fn local_owner() -> JobOwner {
    let username = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_string());
    JobOwner::new(0, username)
}
