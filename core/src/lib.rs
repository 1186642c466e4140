//! Root of the `opsdesk-core` library.
//!
//! Runs appliance shell operations as background jobs and reports their
//! progress to whoever polls for them.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the CLI.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod operation;
pub mod progress;
pub mod remote_shell;
pub mod service;
pub mod vpn;

pub use config::OpsConfig;
pub use error::OpsErr;
pub use error::Result;
pub use jobs::JobId;
pub use jobs::JobOwner;
pub use jobs::JobStatus;
pub use jobs::JobView;
pub use operation::SystemTag;
pub use service::AutomationService;
