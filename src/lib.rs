//! Idempotent, resumable provisioning of an Ubuntu web-app server.
//!
//! Alicerce (Portuguese for *foundation*) takes a fresh Ubuntu host
//! to a running web application: system packages, Node.js,
//! PostgreSQL, a systemd-supervised backend, a static frontend behind
//! nginx, ufw rules, a Let's Encrypt certificate and nightly database
//! backups.
//!
//! # Overview
//!
//! Every action is a [`Step`](step::Step) with a precondition, an
//! apply action and a verification check:
//!
//! - A [`VariableStore`](config::VariableStore) holds the values of
//!   one run, collected by a [`ConfigSource`](source::ConfigSource)
//!   and validated before anything touches the host
//! - A [`Registry`](plan::Registry) orders steps into a
//!   [`Plan`](plan::Plan) by dependency
//! - The [`Runner`](runner::Runner) executes the plan, saving a
//!   [`RunState`](state::RunState) after every transition so a halted
//!   run can be resumed
//! - A [`Reporter`](report::Reporter) renders progress and the final
//!   summary
//!
//! Steps never call OS tools directly. They go through the
//! collaborator traits in [`host`], so the whole plan can run
//! against an in-memory host in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use alicerce::host::Host;
//! use alicerce::report::ConsoleReporter;
//! use alicerce::runner::{RunOptions, Runner};
//! use alicerce::source::{self, NonInteractive, Settings};
//! use alicerce::state::StateStore;
//! use alicerce::step::StepContext;
//! use alicerce::steps;
//!
//! fn main() -> anyhow::Result<()> {
//!     let host = Host::system(Duration::from_secs(900));
//!     let given = Settings {
//!         domain: Some("shop.example.com".into()),
//!         contact_email: Some("ops@example.com".into()),
//!         database_password: Some("correct-horse".into()),
//!         api_key: Some("sk-live-123".into()),
//!         ..Settings::default()
//!     };
//!     let config = source::collect(&mut NonInteractive, given, host.files.as_ref())?;
//!
//!     let registry = steps::canonical_registry()?;
//!     let plan = registry.build_plan()?;
//!     let runner = Runner::new(
//!         StateStore::new("/var/lib/alicerce"),
//!         RunOptions::default(),
//!     );
//!     let state = runner.run(
//!         &plan,
//!         &StepContext::new(&config, &host),
//!         &mut ConsoleReporter::new(),
//!     )?;
//!     println!("{}", state.status);
//!     Ok(())
//! }
//! ```

// Allow noisy pedantic lints that don't add value for a
// provisioning tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod host;
pub mod plan;
pub mod report;
pub mod runner;
pub mod source;
pub mod state;
pub mod step;
pub mod steps;
pub mod template;

pub use config::VariableStore;
pub use error::{ProvisionError, ProvisionResult};
pub use host::Host;
pub use plan::{Plan, Registry};
pub use runner::{CancelToken, RunOptions, Runner};
pub use state::{RunState, RunStatus, StateStore, StepStatus};
pub use step::{Outcome, Step, StepContext, StepDefinition};
