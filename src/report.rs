//! Progress and summary rendering.

use colored::Colorize;

use crate::config::VariableStore;
use crate::plan::Plan;
use crate::runner::{PreviewAction, PreviewEntry};
use crate::state::{DeferredAction, RunState, RunStatus, StepResult, StepStatus};
use crate::step::StepDefinition;

/// Observer called synchronously by the runner at each transition.
pub trait Reporter {
    fn on_plan(&mut self, _plan: &Plan<'_>) {}

    fn on_step_start(&mut self, definition: &StepDefinition);

    fn on_step_result(&mut self, result: &StepResult);

    fn on_run_complete(&mut self, summary: &RunSummary);
}

/// Reporter that discards everything.
#[derive(Debug, Default)]
pub struct NoReport;

impl Reporter for NoReport {
    fn on_step_start(&mut self, _definition: &StepDefinition) {}

    fn on_step_result(&mut self, _result: &StepResult) {}

    fn on_run_complete(&mut self, _summary: &RunSummary) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub step_id: String,
    pub error: String,
    pub remedy: Option<String>,
}

/// Final outcome of a run, derived from its state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub failures: Vec<FailureReport>,
    pub deferred: Vec<(String, DeferredAction)>,
    pub warnings: Vec<(String, String)>,
    /// Present only when the run halted.
    pub resume_command: Option<String>,
}

impl RunSummary {
    #[must_use]
    pub fn from_state(state: &RunState, resume_command: &str) -> Self {
        let failures = state
            .steps
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .map(|r| FailureReport {
                step_id: r.step_id.clone(),
                error: r.error.clone().unwrap_or_default(),
                remedy: r.remedy.clone(),
            })
            .collect();

        let deferred = state
            .steps
            .iter()
            .filter_map(|r| r.deferred.clone().map(|d| (r.step_id.clone(), d)))
            .collect();

        let warnings = state
            .steps
            .iter()
            .flat_map(|r| r.warnings.iter().map(|w| (r.step_id.clone(), w.clone())))
            .collect();

        Self {
            run_id: state.id.clone(),
            status: state.status,
            succeeded: state.count(StepStatus::Succeeded),
            skipped: state.count(StepStatus::Skipped),
            failed: state.count(StepStatus::Failed),
            not_attempted: state.count(StepStatus::Pending) + state.count(StepStatus::Running),
            failures,
            deferred,
            warnings,
            resume_command: (state.status == RunStatus::Halted)
                .then(|| resume_command.to_string()),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Manual follow-ups, in plan order.
    #[must_use]
    pub fn next_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .deferred
            .iter()
            .map(|(_, d)| format!("{}: {}", d.notice, d.action))
            .collect();
        if let Some(resume) = &self.resume_command {
            actions.push(format!("Fix the failure above, then resume with: {resume}"));
        }
        actions
    }
}

/// Colored terminal output.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    total: usize,
    position: usize,
}

impl ConsoleReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for ConsoleReporter {
    fn on_plan(&mut self, plan: &Plan<'_>) {
        self.total = plan.len();
        self.position = 0;
        header(&format!("Provisioning plan ({} steps)", plan.len()));
    }

    fn on_step_start(&mut self, definition: &StepDefinition) {
        self.position += 1;
        println!(
            "{} {}",
            format!("[{}/{}]", self.position, self.total).blue().bold(),
            definition.label
        );
    }

    fn on_step_result(&mut self, result: &StepResult) {
        match result.status {
            StepStatus::Succeeded => {
                let note = if result.reverified { " (re-applied)" } else { "" };
                println!("  {} {}{note}", "✓".green(), result.step_id);
            }
            StepStatus::Skipped => {
                let note = if result.reverified {
                    "still in place"
                } else {
                    "already in place"
                };
                println!("  {} {} {}", "↷".cyan(), result.step_id, note.dimmed());
            }
            StepStatus::Failed => {
                eprintln!("  {} {}", "✗".red(), result.step_id);
                if let Some(error) = &result.error {
                    eprintln!("    {}", error.red());
                }
            }
            StepStatus::Pending if !result.blocked_by.is_empty() => {
                println!(
                    "  {} {} {}",
                    "·".dimmed(),
                    result.step_id,
                    format!("blocked by {}", result.blocked_by.join(", ")).dimmed()
                );
            }
            StepStatus::Pending | StepStatus::Running => {}
        }
        if let Some(deferred) = &result.deferred {
            println!("  {} {}", "⚠".yellow(), deferred.notice);
        }
        for warning in &result.warnings {
            println!("  {} {warning}", "⚠".yellow());
        }
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        print_summary(summary);
    }
}

fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

fn kv(key: &str, value: &str) {
    println!("  {}: {value}", key.dimmed());
}

pub fn print_summary(summary: &RunSummary) {
    header(&format!("Run {}", summary.run_id));
    kv("succeeded", &summary.succeeded.to_string());
    kv("skipped", &summary.skipped.to_string());
    kv("failed", &summary.failed.to_string());
    kv("not attempted", &summary.not_attempted.to_string());

    for failure in &summary.failures {
        eprintln!();
        eprintln!("{} {}", "✗".red(), format!("{} failed", failure.step_id).bold());
        eprintln!("  {}", failure.error);
        if let Some(remedy) = &failure.remedy {
            eprintln!("  {} {remedy}", "remedy:".dimmed());
        }
    }

    for (step, warning) in &summary.warnings {
        println!("{} {step}: {warning}", "⚠".yellow());
    }

    let actions = summary.next_actions();
    if !actions.is_empty() {
        println!();
        println!("{}", "Next steps".cyan().bold());
        for action in actions {
            println!("  - {action}");
        }
    }

    println!();
    match summary.status {
        RunStatus::Completed if summary.deferred.is_empty() => {
            println!("{} Provisioning completed", "✓".green());
        }
        RunStatus::Completed => {
            println!(
                "{} Provisioning completed with {} deferred action(s)",
                "✓".green(),
                summary.deferred.len()
            );
        }
        RunStatus::Halted => {
            eprintln!("{} Provisioning halted", "✗".red());
        }
        RunStatus::NotStarted | RunStatus::InProgress => {
            eprintln!("{} Provisioning did not finish", "⚠".yellow());
        }
    }
}

/// Configuration review shown before anything runs.
pub fn print_masked_config(store: &VariableStore) {
    header("Configuration");
    for (key, shown) in store.masked_summary() {
        kv(&key, &shown);
    }
}

pub fn print_plan(plan: &Plan<'_>) {
    header(&format!("Plan ({} steps)", plan.len()));
    for (i, step) in plan.steps().iter().enumerate() {
        let deps = if step.dependencies.is_empty() {
            String::new()
        } else {
            format!(" after {}", step.dependencies.join(", "))
        };
        println!(
            "{} {} {}{}",
            format!("{:>2}.", i + 1).blue(),
            step.id.bold(),
            step.label,
            deps.dimmed()
        );
    }
}

pub fn print_state(state: &RunState) {
    header(&format!("Run {}", state.id));
    kv("host", &state.host);
    kv("status", &state.status.to_string());
    kv("attempts", &state.attempts.to_string());
    kv("started", &state.created_at.to_rfc3339());
    kv("updated", &state.updated_at.to_rfc3339());
    println!();
    for result in &state.steps {
        let symbol = match result.status {
            StepStatus::Succeeded => "✓".green(),
            StepStatus::Skipped => "↷".cyan(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Running => "…".yellow(),
            StepStatus::Pending => "·".dimmed(),
        };
        println!("{symbol} {:<20} {}", result.step_id, result.status);
        if let Some(error) = &result.error {
            println!("    {}", error.red());
        }
        if let Some(deferred) = &result.deferred {
            println!("    {} {}", "deferred:".dimmed(), deferred.action);
        }
    }
}

pub fn print_preview(entries: &[PreviewEntry]) {
    header("Dry run: no changes will be made");
    for entry in entries {
        match &entry.action {
            PreviewAction::Skip => {
                println!("  {} {} {}", "↷".cyan(), entry.step_id, "in place".dimmed());
            }
            PreviewAction::Apply => {
                println!("  {} {} {}", "+".green(), entry.step_id, "would apply".dimmed());
            }
            PreviewAction::Unknown(reason) => {
                println!("  {} {} {}", "?".yellow(), entry.step_id, reason.dimmed());
            }
        }
    }
}
