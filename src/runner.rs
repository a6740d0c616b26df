//! Plan execution.
//!
//! Steps run one at a time in plan order. Each transition is saved to
//! the state record before the reporter sees it, so an interrupted
//! run can always be resumed from what is on disk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ProvisionError, ProvisionResult};
use crate::plan::Plan;
use crate::report::{Reporter, RunSummary};
use crate::state::{DeferredAction, RunState, RunStatus, StateStore, StepResult, StepStatus};
use crate::step::{Outcome, StepContext, StepDefinition};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Continue the recorded run instead of starting over.
    pub resume: bool,
    pub step_timeout: Duration,
    /// Keep running steps that do not depend on a failed one.
    pub continue_independent: bool,
    pub host_name: String,
    /// Shown to the operator when the run halts.
    pub resume_command: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: false,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            continue_independent: true,
            host_name: "localhost".to_string(),
            resume_command: "alicerce run --resume".to_string(),
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub const fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn continue_independent(mut self, enabled: bool) -> Self {
        self.continue_independent = enabled;
        self
    }

    #[must_use]
    pub fn host_name(mut self, host: &str) -> Self {
        self.host_name = host.to_string();
        self
    }

    #[must_use]
    pub fn resume_command(mut self, command: &str) -> Self {
        self.resume_command = command.to_string();
        self
    }
}

/// Shared flag to stop a run between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A token cancelled by SIGINT, SIGTERM or SIGHUP. The handler is
    /// process-wide and can be installed once.
    pub fn from_signals() -> ProvisionResult<Self> {
        let token = Self::new();
        let handler = token.clone();
        ctrlc::set_handler(move || {
            if !handler.is_cancelled() {
                eprintln!("Interrupted, stopping after the current step...");
            }
            handler.cancel();
        })
        .map_err(std::io::Error::other)?;
        Ok(token)
    }
}

pub struct Runner {
    store: StateStore,
    options: RunOptions,
    cancel: CancelToken,
}

impl Runner {
    #[must_use]
    pub fn new(store: StateStore, options: RunOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute the plan and return the final state record.
    ///
    /// Step failures do not make this return `Err`: they halt the run
    /// and are recorded in the returned state. `Err` means the run
    /// could not be driven at all (lock held, state unreadable).
    pub fn run(
        &self,
        plan: &Plan<'_>,
        ctx: &StepContext<'_>,
        reporter: &mut dyn Reporter,
    ) -> ProvisionResult<RunState> {
        let _lock = self.store.lock()?;
        let mut state = self.prepare(plan)?;

        state.status = RunStatus::InProgress;
        state.attempts += 1;
        state.touch();
        self.store.save(&state)?;
        log::info!("Run {} attempt {}", state.id, state.attempts);

        reporter.on_plan(plan);

        let mut failed = false;
        for (i, def) in plan.steps().iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("Run cancelled before {}", def.id);
                let result = &mut state.steps[i];
                result.begin();
                result.fail(&ProvisionError::Cancelled, None);
                self.commit(&mut state, i, reporter)?;
                failed = true;
                break;
            }

            if failed && !self.options.continue_independent {
                break;
            }

            let blocked_by: Vec<String> = def
                .dependencies
                .iter()
                .filter(|d| !state.result(d).is_some_and(|r| r.status.is_done()))
                .cloned()
                .collect();
            if !blocked_by.is_empty() {
                log::info!("{} blocked by {}", def.id, blocked_by.join(", "));
                state.steps[i].block(blocked_by);
                self.commit(&mut state, i, reporter)?;
                continue;
            }

            reporter.on_step_start(def);
            let previously_done = state.steps[i].status.is_done();
            state.steps[i].begin();
            state.touch();
            self.store.save(&state)?;

            self.execute(def, ctx, previously_done, &mut state.steps[i]);
            if state.steps[i].status == StepStatus::Failed {
                failed = true;
            }
            self.commit(&mut state, i, reporter)?;
        }

        state.status = if state.all_done() {
            RunStatus::Completed
        } else {
            RunStatus::Halted
        };
        state.touch();
        self.store.save(&state)?;
        log::info!("Run {} {}", state.id, state.status);

        let summary = RunSummary::from_state(&state, &self.options.resume_command);
        reporter.on_run_complete(&summary);
        Ok(state)
    }

    /// Load the record to resume, or archive it and start over.
    fn prepare(&self, plan: &Plan<'_>) -> ProvisionResult<RunState> {
        match self.store.load()? {
            Some(mut state) if self.options.resume => {
                log::info!("Resuming run {} ({})", state.id, state.status);
                state.align_with(plan);
                Ok(state)
            }
            Some(previous) => {
                self.store.archive(&previous)?;
                Ok(RunState::new(&self.options.host_name, plan))
            }
            None => {
                if self.options.resume {
                    log::warn!("No recorded run to resume, starting a new one");
                }
                Ok(RunState::new(&self.options.host_name, plan))
            }
        }
    }

    fn commit(
        &self,
        state: &mut RunState,
        index: usize,
        reporter: &mut dyn Reporter,
    ) -> ProvisionResult<()> {
        state.touch();
        self.store.save(state)?;
        reporter.on_step_result(&state.steps[index]);
        Ok(())
    }

    /// Run one step with its time budget armed on the host, so every
    /// command the step starts is killed at the step deadline.
    fn execute(
        &self,
        def: &StepDefinition,
        ctx: &StepContext<'_>,
        previously_done: bool,
        result: &mut StepResult,
    ) {
        let budget = def.action().timeout().unwrap_or(self.options.step_timeout);
        ctx.host.deadline.start(budget);
        Self::attempt(def, ctx, previously_done, budget, result);
        ctx.host.deadline.clear();
    }

    fn attempt(
        def: &StepDefinition,
        ctx: &StepContext<'_>,
        previously_done: bool,
        budget: Duration,
        result: &mut StepResult,
    ) {
        let action = def.action();
        let started = Instant::now();
        result.reverified = previously_done;

        match action.precondition(ctx) {
            Ok(true) => {
                log::info!("{} already in place", def.id);
                result.finish(StepStatus::Skipped);
                return;
            }
            Ok(false) if previously_done => {
                log::warn!("{} no longer holds, applying again", def.id);
            }
            Ok(false) => {}
            Err(e) => {
                result.fail(&e.in_step(&def.id), action.remedy(ctx));
                return;
            }
        }

        let applied = action.apply(ctx);
        let elapsed = started.elapsed();

        let outcome = match applied {
            Err(e) => {
                log::error!("{} failed: {e}", def.id);
                result.fail(&e.in_step(&def.id), action.remedy(ctx));
                return;
            }
            Ok(_) if elapsed > budget => {
                let err = ProvisionError::CollaboratorTimeout {
                    step: def.id.clone(),
                    after: budget,
                };
                log::error!("{err}");
                result.fail(&err, action.remedy(ctx));
                return;
            }
            Ok(outcome) => outcome,
        };

        match outcome {
            Outcome::Applied => match action.verify(ctx) {
                Ok(true) => {
                    log::info!("{} applied in {:.1}s", def.id, elapsed.as_secs_f64());
                    result.finish(StepStatus::Succeeded);
                }
                Ok(false) => {
                    let err = ProvisionError::PostconditionViolation {
                        step: def.id.clone(),
                    };
                    log::error!("{err}");
                    result.fail(&err, action.remedy(ctx));
                }
                Err(e) => result.fail(&e.in_step(&def.id), action.remedy(ctx)),
            },
            Outcome::Deferred {
                notice,
                action: follow_up,
            } => {
                log::warn!("{}: {notice}", def.id);
                result.deferred = Some(DeferredAction {
                    notice,
                    action: follow_up,
                });
                result.finish(StepStatus::Succeeded);
            }
            Outcome::Degraded { warning } => {
                log::warn!("{}: {warning}", def.id);
                result.warnings.push(warning);
                result.finish(StepStatus::Succeeded);
            }
        }
    }
}

/// What a dry run found for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewAction {
    /// Effect already in place.
    Skip,
    Apply,
    /// The check itself failed, usually because an earlier step has
    /// not run yet.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewEntry {
    pub step_id: String,
    pub label: String,
    pub action: PreviewAction,
}

/// Evaluate preconditions only. Nothing is applied and no state is
/// written.
#[must_use]
pub fn preview(plan: &Plan<'_>, ctx: &StepContext<'_>) -> Vec<PreviewEntry> {
    plan.steps()
        .iter()
        .map(|def| {
            let action = match def.action().precondition(ctx) {
                Ok(true) => PreviewAction::Skip,
                Ok(false) => PreviewAction::Apply,
                Err(e) => PreviewAction::Unknown(e.to_string()),
            };
            PreviewEntry {
                step_id: def.id.clone(),
                label: def.label.clone(),
                action,
            }
        })
        .collect()
}
