use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use alicerce::cli::{self, Cli, Command, RunArgs, StatusArgs};
use alicerce::cmd::Shell;
use alicerce::host::{self, Host};
use alicerce::report::{self, ConsoleReporter};
use alicerce::runner::{self, CancelToken, RunOptions, Runner};
use alicerce::source::{self, ConfigSource, Interactive, NonInteractive, Settings};
use alicerce::state::{self, StateStore};
use alicerce::step::StepContext;
use alicerce::steps;
use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;

const OS_RELEASE: &str = "/etc/os-release";
const ID_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli::log_level(cli.verbose, cli.quiet))
        .format_timestamp(None)
        .init();

    let result = match &cli.command {
        Command::Run(args) => run(args),
        Command::Plan => plan(),
        Command::Status(args) => status(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "✗".red());
            cli::exit_code(&e)
        }
    }
}

fn run(args: &RunArgs) -> Result<ExitCode> {
    let is_root = preflight(args)?;

    let mut given = Settings::default();
    if let Some(path) = &args.config {
        given = Settings::from_file(path)?;
    }
    let given = given.merge(args.settings());

    let host = Host::system(args.step_timeout());

    let interactive = !args.non_interactive && std::io::stdin().is_terminal();
    if !args.non_interactive && !interactive {
        log::warn!("stdin is not a terminal, continuing without prompts");
    }
    let mut source: Box<dyn ConfigSource> = if interactive {
        Box::new(Interactive::new().assume_yes(args.yes))
    } else {
        Box::new(NonInteractive)
    };

    let config = source::collect(source.as_mut(), given, host.files.as_ref())?;
    if !interactive {
        report::print_masked_config(&config);
    }
    if !source.confirm(&config)? {
        eprintln!("Aborted, nothing was changed.");
        return Ok(ExitCode::from(cli::EXIT_INVALID));
    }

    let registry = steps::canonical_registry()?;
    let plan = registry.build_plan()?;
    let ctx = StepContext::new(&config, &host);

    if args.dry_run {
        report::print_preview(&runner::preview(&plan, &ctx));
        return Ok(ExitCode::from(cli::EXIT_COMPLETED));
    }

    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| state::default_state_dir(is_root));
    let options = RunOptions::default()
        .resume(args.resume)
        .step_timeout(args.step_timeout())
        .host_name(&host::local_hostname())
        .resume_command(&args.resume_command());

    let runner = Runner::new(StateStore::new(&state_dir), options);
    let runner = match CancelToken::from_signals() {
        Ok(token) => runner.cancel_token(token),
        Err(e) => {
            log::warn!("Interrupts will not stop the run cleanly: {e}");
            runner
        }
    };
    let state = runner.run(&plan, &ctx, &mut ConsoleReporter::new())?;

    Ok(ExitCode::from(cli::exit_code_for_status(state.status)))
}

/// Refuse to run without root, warn on distributions other than
/// Ubuntu. Returns whether we run as root.
fn preflight(args: &RunArgs) -> Result<bool> {
    let uid = Shell::new(ID_TIMEOUT)
        .run("id", &["-u"])
        .context("could not determine the current user")?;
    let is_root = uid.trim() == "0";
    if !is_root && !args.skip_root_check {
        bail!("must be run as root (try sudo), or pass --skip-root-check");
    }

    match std::fs::read_to_string(OS_RELEASE) {
        Ok(release) if is_ubuntu(&release) => {}
        Ok(_) => log::warn!("This host is not Ubuntu; package names may differ"),
        Err(e) => log::warn!("Could not read {OS_RELEASE}: {e}"),
    }
    Ok(is_root)
}

fn is_ubuntu(os_release: &str) -> bool {
    os_release
        .lines()
        .filter_map(|l| l.split_once('='))
        .any(|(k, v)| k == "ID" && v.trim_matches('"') == "ubuntu")
}

fn plan() -> Result<ExitCode> {
    let registry = steps::canonical_registry()?;
    report::print_plan(&registry.build_plan()?);
    Ok(ExitCode::SUCCESS)
}

fn status(args: &StatusArgs) -> Result<ExitCode> {
    let dir = args.state_dir.clone().unwrap_or_else(|| {
        let is_root = Shell::new(ID_TIMEOUT)
            .run("id", &["-u"])
            .is_ok_and(|uid| uid.trim() == "0");
        state::default_state_dir(is_root)
    });
    let store = StateStore::new(&dir);
    match store.load()? {
        Some(state) => {
            report::print_state(&state);
            Ok(ExitCode::from(cli::exit_code_for_status(state.status)))
        }
        None => {
            println!("No run recorded in {}", dir.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}
