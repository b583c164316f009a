//! deployflow - staged deployment orchestrator
//!
//! Brings the configured bundle stages up in dependency order, or down in
//! reverse, driving the deployment CLI for every step.

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use deployflow::cancellation::CancellationToken;
use deployflow::config::DeployConfig;
use deployflow::context::RunContext;
use deployflow::core::RunMode;
use deployflow::errors::DeployError;
use deployflow::observability::init_logging;
use deployflow::pipeline::{Orchestrator, RunReport};
use tracing::{debug, info};

mod args;
mod console;

use args::{Action, DeployAction, Invocation};
use console::ConsoleEventSink;

/// Default log filter; `RUST_LOG` overrides it.
const DEFAULT_LOG_FILTER: &str = "warn";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let cwd = std::env::current_dir().context("Cannot determine working directory")?;

    let config = DeployConfig::load(args::config_path(&argv).as_deref(), &cwd)?;
    let stages = config.stage_set().map_err(|e| {
        let info = e.info();
        match info.fix_hint {
            Some(hint) => anyhow!("[{}] {}\n  hint: {hint}", info.code, info.summary),
            None => anyhow!("[{}] {}", info.code, info.summary),
        }
    })?;

    let command = args::build_command(&stages).map_err(|e| anyhow!(e))?;
    let invocation = match args::parse(command, &argv, &stages) {
        Ok(invocation) => invocation,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let failed = e.use_stderr();
            if let Err(print_err) = e.print() {
                debug!(error = %print_err, "Could not print usage");
            }
            return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
        }
    };

    if let Err(e) = init_logging(invocation.log_format, DEFAULT_LOG_FILTER) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let host = config.host()?;
    debug!(host = %host, target = %config.target, "Resolved host endpoint");

    let token = Arc::new(CancellationToken::new());
    spawn_interrupt_watcher(Arc::clone(&token));

    let mut orchestrator = Orchestrator::new(Arc::new(config.backend(&host)), stages)
        .with_gate(config.readiness_gate())
        .with_events(Arc::new(ConsoleEventSink::new(invocation.json)))
        .with_cancellation(token);
    if let Some(backup) = config.config_backup() {
        orchestrator = orchestrator.with_backup(backup);
    }

    let mut ctx = run_context(&config, &invocation);
    let (mode, result) = dispatch(&orchestrator, &invocation.action, &mut ctx).await;

    let report = match result {
        Ok(report) => report,
        Err(DeployError::Cancelled(reason)) => {
            eprintln!("Cancelled: {reason}");
            print_report(&RunReport::from_context(mode, &ctx), invocation.json)?;
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    print_report(&report, invocation.json)?;
    info!(run_id = %report.run_id, success = report.is_success(), "Run finished");
    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}

fn run_context(config: &DeployConfig, invocation: &Invocation) -> RunContext {
    let target = invocation.target.as_deref().unwrap_or(&config.target);
    let force = matches!(invocation.action, Action::Deploy { force: true, .. });
    let ctx = RunContext::new(target).with_force(force);
    match invocation.profile.as_ref().or(config.profile.as_ref()) {
        Some(profile) => ctx.with_profile(profile),
        None => ctx,
    }
}

async fn dispatch(
    orchestrator: &Orchestrator,
    action: &Action,
    ctx: &mut RunContext,
) -> (RunMode, Result<RunReport, DeployError>) {
    match action {
        Action::Deploy { action, .. } => match action {
            DeployAction::All => (RunMode::Deploy, orchestrator.deploy(ctx).await),
            DeployAction::Validate => (RunMode::Validate, orchestrator.validate_all(ctx).await),
            DeployAction::Stage(id) => (RunMode::DeployStage, orchestrator.deploy_stage(id, ctx).await),
            DeployAction::ClearLocks => (RunMode::ClearLocks, orchestrator.clear_locks(ctx).await),
            DeployAction::StartServices => (RunMode::StartServices, orchestrator.start_services(ctx).await),
        },
        Action::Destroy {
            stop_services,
            stage: Some(id),
        } => (
            RunMode::TeardownStage,
            orchestrator.teardown_stage(id, *stop_services, ctx).await,
        ),
        Action::Destroy {
            stop_services,
            stage: None,
        } => (RunMode::Teardown, orchestrator.teardown(*stop_services, ctx).await),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json().context("Failed to serialize run report")?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Cancels the run on Ctrl-C.
fn spawn_interrupt_watcher(token: Arc<CancellationToken>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel("interrupted by operator");
        }
    });
}
