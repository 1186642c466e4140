//! Entry point for callers: validate a request, start it as a job, poll it.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::OpsConfig;
use crate::credentials::CredentialStore;
use crate::error::OpsErr;
use crate::error::Result;
use crate::jobs::JobId;
use crate::jobs::JobOwner;
use crate::jobs::JobStore;
use crate::jobs::JobView;
use crate::operation::SystemTag;
use crate::progress::ProgressSink;
use crate::remote_shell::ShellConnector;
use crate::remote_shell::SshConnector;
use crate::vpn;
use crate::vpn::ApplianceTarget;
use crate::vpn::FirewallAccess;
use crate::vpn::VpnContext;
use crate::vpn::VpnRequest;

pub struct AutomationService {
    jobs: JobStore,
    credentials: Arc<dyn CredentialStore>,
    vpn_connector: Arc<dyn ShellConnector>,
    firewall_connector: Option<Arc<dyn ShellConnector>>,
    config: OpsConfig,
}

impl AutomationService {
    pub fn new(
        config: OpsConfig,
        credentials: Arc<dyn CredentialStore>,
        vpn_connector: Arc<dyn ShellConnector>,
    ) -> Self {
        Self {
            jobs: JobStore::new(config.jobs.clone()),
            credentials,
            vpn_connector,
            firewall_connector: None,
            config,
        }
    }

    pub fn with_firewall_connector(mut self, connector: Arc<dyn ShellConnector>) -> Self {
        self.firewall_connector = Some(connector);
        self
    }

    /// SSH connectors for the configured appliance addresses.
    pub fn from_config(config: OpsConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let vpn_cfg = &config.vpn;
        if vpn_cfg.ssh_addr.trim().is_empty() {
            return Err(OpsErr::Config(
                "the VPN appliance address is not configured (set vpn.ssh_addr or VPN_SSH_ADDR)".to_string(),
            ));
        }
        let vpn_connector = SshConnector::new(vpn_cfg.ssh_addr.trim(), vpn_cfg.port)
            .with_connect_timeout(vpn_cfg.connect_timeout());
        let firewall = (!vpn_cfg.firewall_addr.trim().is_empty()).then(|| {
            SshConnector::new(vpn_cfg.firewall_addr.trim(), vpn_cfg.port)
                .with_connect_timeout(vpn_cfg.connect_timeout())
        });

        let mut service = Self::new(config, credentials, Arc::new(vpn_connector));
        if let Some(firewall) = firewall {
            service = service.with_firewall_connector(Arc::new(firewall));
        }
        Ok(service)
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Validate `params`, look up the owner's credentials and start the job.
    ///
    /// Nothing is created when validation or the credential lookup fails.
    pub fn submit(
        &self,
        owner: &JobOwner,
        system: SystemTag,
        operation: &str,
        params: Value,
        observer: Option<Arc<dyn ProgressSink>>,
    ) -> Result<JobId> {
        match system {
            SystemTag::Vpn => {
                let request = VpnRequest::parse(operation, params, &self.config.vpn.known_groups)?;
                let credentials = self.credentials.lookup(owner, vpn::APPLIANCE_SYSTEM)?;
                let appliance = ApplianceTarget::new(
                    Arc::clone(&self.vpn_connector),
                    credentials,
                    self.config.shell.clone(),
                );
                let mut ctx = VpnContext::new(appliance);
                if request.wants_firewall() {
                    ctx = ctx.with_firewall(self.firewall_access(owner));
                }
                debug!(owner = owner.id, operation, "submitting vpn operation");
                let operation = request.operation_name();
                Ok(self.jobs.submit_observed(
                    owner.clone(),
                    system,
                    operation,
                    observer,
                    move |progress| vpn::execute(ctx, request, progress),
                ))
            }
            SystemTag::Directory | SystemTag::Print => Err(OpsErr::Unsupported {
                system: system.to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    pub fn poll(&self, id: &JobId, owner: &JobOwner) -> Option<JobView> {
        self.jobs.snapshot(id, owner)
    }

    fn firewall_access(&self, owner: &JobOwner) -> FirewallAccess {
        let Some(connector) = self.firewall_connector.as_ref() else {
            return FirewallAccess::Unavailable("firewall address is not configured".to_string());
        };
        match self.credentials.lookup(owner, vpn::FIREWALL_SYSTEM) {
            Ok(credentials) => FirewallAccess::Ready(ApplianceTarget::new(
                Arc::clone(connector),
                credentials,
                self.config.shell.clone(),
            )),
            Err(err) => FirewallAccess::Unavailable(err.to_string()),
        }
    }
}
