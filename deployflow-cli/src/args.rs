//! Command-line surface.
//!
//! Stage flags (`--<stage>` on deploy, `--<stage>-only` on destroy) are
//! generated from the loaded stage set, so the command is built at runtime
//! with the clap builder API.

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use deployflow::observability::LogFormat;
use deployflow::stages::StageSet;
use std::ffi::OsString;
use std::path::PathBuf;

const RESERVED: &[&str] = &[
    "config",
    "log-format",
    "json",
    "profile",
    "target",
    "validate",
    "force",
    "clear-locks",
    "start-services",
    "stop-services",
    "help",
    "version",
];

/// What the deploy subcommand should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    /// Deploy every stage.
    All,
    /// Validate only.
    Validate,
    /// Deploy one stage.
    Stage(String),
    /// Release stale locks.
    ClearLocks,
    /// Trigger workloads only.
    StartServices,
}

/// The selected subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `deployflow deploy`.
    Deploy {
        /// Which deploy run.
        action: DeployAction,
        /// Force mode.
        force: bool,
    },
    /// `deployflow destroy`.
    Destroy {
        /// Stop workloads first.
        stop_services: bool,
        /// Tear down one stage only.
        stage: Option<String>,
    },
}

/// A fully parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// Log line format.
    pub log_format: LogFormat,
    /// Print the report as JSON.
    pub json: bool,
    /// Profile override.
    pub profile: Option<String>,
    /// Target override.
    pub target: Option<String>,
    /// What to run.
    pub action: Action,
}

/// Finds `--config` before the full command can be built.
///
/// The stage flags depend on the configuration, so this scan runs first
/// and tolerates every argument it does not understand.
pub fn config_path(args: &[OsString]) -> Option<PathBuf> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let arg = arg.to_string_lossy();
        if arg == "--" {
            break;
        }
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
    }
    None
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_name("PATH")
        .value_parser(clap::value_parser!(PathBuf))
        .global(true)
        .help("Configuration file (default: deployflow.toml if present)")
}

fn identity_args() -> [Arg; 2] {
    [
        Arg::new("profile")
            .long("profile")
            .value_name("NAME")
            .help("Credential profile passed to every backend call"),
        Arg::new("target")
            .long("target")
            .value_name("NAME")
            .help("Target environment (default from configuration)"),
    ]
}

/// Builds the command for a stage set.
///
/// # Errors
///
/// Returns an error naming a stage whose id clashes with a built-in flag.
pub fn build_command(stages: &StageSet) -> Result<Command, String> {
    let mut deploy = Command::new("deploy")
        .about("Deploy all stages, or one stage, in dependency order")
        .args(identity_args())
        .arg(
            Arg::new("validate")
                .long("validate")
                .action(ArgAction::SetTrue)
                .help("Validate every stage and exit"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Skip existence checks and override deployment locks"),
        )
        .arg(
            Arg::new("clear-locks")
                .long("clear-locks")
                .action(ArgAction::SetTrue)
                .help("Release stale deployment locks on every stage"),
        )
        .arg(
            Arg::new("start-services")
                .long("start-services")
                .action(ArgAction::SetTrue)
                .help("Start stage workloads and wait for readiness, without deploying"),
        );

    let mut destroy = Command::new("destroy")
        .about("Tear down all stages in reverse order, or one stage")
        .args(identity_args())
        .arg(
            Arg::new("stop-services")
                .long("stop-services")
                .action(ArgAction::SetTrue)
                .help("Stop stage workloads before teardown"),
        );

    let mut deploy_modes = vec!["validate".to_string(), "clear-locks".to_string(), "start-services".to_string()];
    let mut destroy_stages = Vec::new();

    for stage in stages.deploy_order() {
        let id = stage.id.as_str();
        if RESERVED.contains(&id) {
            return Err(format!("stage id '{id}' clashes with a built-in flag"));
        }
        let about = stage.description.clone().unwrap_or_else(|| format!("Stage '{id}'"));

        deploy = deploy.arg(
            Arg::new(stage_arg_id(id))
                .long(id.to_string())
                .action(ArgAction::SetTrue)
                .help(format!("Deploy only '{id}': {about}")),
        );
        deploy_modes.push(stage_arg_id(id));

        let only = format!("{id}-only");
        destroy = destroy.arg(
            Arg::new(destroy_arg_id(id))
                .long(only)
                .action(ArgAction::SetTrue)
                .help(format!("Destroy only '{id}'")),
        );
        destroy_stages.push(destroy_arg_id(id));
    }

    deploy = deploy.group(ArgGroup::new("mode").args(deploy_modes).multiple(false));
    destroy = destroy.group(ArgGroup::new("only").args(destroy_stages).multiple(false));

    Ok(Command::new("deployflow")
        .about("Staged deployment orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(config_arg())
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .default_value("pretty")
                .global(true)
                .help("Log line format on stderr"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print the run report as JSON"),
        )
        .subcommand(deploy)
        .subcommand(destroy))
}

fn stage_arg_id(id: &str) -> String {
    format!("stage:{id}")
}

fn destroy_arg_id(id: &str) -> String {
    format!("only:{id}")
}

/// Parses arguments against a built command.
///
/// # Errors
///
/// Returns the clap error for unknown flags, conflicts and help requests.
pub fn parse(command: Command, args: &[OsString], stages: &StageSet) -> Result<Invocation, clap::Error> {
    let matches = command.try_get_matches_from(args)?;

    let log_format = matches
        .get_one::<String>("log-format")
        .and_then(|f| f.parse().ok())
        .unwrap_or_default();
    let config = matches.get_one::<PathBuf>("config").cloned();
    let json = matches.get_flag("json");

    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| clap::Error::new(clap::error::ErrorKind::MissingSubcommand))?;

    let action = match name {
        "deploy" => Action::Deploy {
            action: deploy_action(sub, stages),
            force: sub.get_flag("force"),
        },
        _ => Action::Destroy {
            stop_services: sub.get_flag("stop-services"),
            stage: selected_stage(sub, stages, destroy_arg_id),
        },
    };

    Ok(Invocation {
        config,
        log_format,
        json,
        profile: sub.get_one::<String>("profile").cloned(),
        target: sub.get_one::<String>("target").cloned(),
        action,
    })
}

fn deploy_action(sub: &ArgMatches, stages: &StageSet) -> DeployAction {
    if sub.get_flag("validate") {
        DeployAction::Validate
    } else if sub.get_flag("clear-locks") {
        DeployAction::ClearLocks
    } else if sub.get_flag("start-services") {
        DeployAction::StartServices
    } else {
        selected_stage(sub, stages, stage_arg_id).map_or(DeployAction::All, DeployAction::Stage)
    }
}

fn selected_stage(sub: &ArgMatches, stages: &StageSet, arg_id: fn(&str) -> String) -> Option<String> {
    stages
        .deploy_order()
        .find(|stage| sub.get_flag(&arg_id(&stage.id)))
        .map(|stage| stage.id.clone())
}
