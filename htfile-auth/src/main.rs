//! Host-facing CLI. Each invocation handles one event or action and exits;
//! results go to stdout as JSON, the unit status to stderr as one JSON line.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use htfile_auth_helper::error::AppError;
use htfile_auth_helper::helper::AuthHelper;
use htfile_auth_helper::relation::{to_json, MemoryChannel};
use htfile_auth_helper::squid::SQUID_TOOLS_DIRS;
use htfile_auth_helper::status::MemoryStatus;
use htfile_auth_helper::telemetry::{
    init_logging, LogFormat, LoggingConfig, DEFAULT_LOG_LEVEL,
};
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

const DEFAULT_CONFIG_PATH: &str = "/etc/htfile-auth-helper/config.json";

type Helper = AuthHelper<PathBuf, MemoryChannel, MemoryStatus>;

#[derive(Debug, Parser)]
#[command(
    name = "htfile-auth-helper",
    version,
    about = "Manage the Squid basic/digest credential vault"
)]
struct Cli {
    /// JSON file holding the helper settings.
    #[arg(
        long,
        global = true,
        env = "HTFILE_AUTH_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,
    /// Whether a Squid proxy is currently related.
    #[arg(
        long,
        global = true,
        env = "HTFILE_AUTH_RELATED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    related: bool,
    /// Also write published relation data to this file.
    #[arg(long, global = true, env = "HTFILE_AUTH_RELATION_DATA")]
    relation_data: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print it.
    Validate,
    /// Handle a configuration change.
    ConfigChanged,
    /// Handle a new relation with a Squid proxy.
    RelationCreated,
    /// Handle the relation with the Squid proxy going away.
    RelationBroken,
    /// Create a user and print its generated password.
    CreateUser { username: String },
    /// Remove a user.
    RemoveUser { username: String },
    /// List usernames.
    ListUsers,
    /// Check a password read from stdin.
    VerifyUser { username: String },
    /// Print the `auth_param` lines for squid.conf.
    RenderSquidConfig {
        /// Directory holding the Squid helper programs.
        #[arg(long)]
        tools_dir: Option<PathBuf>,
    },
}

impl Command {
    fn is_event(&self) -> bool {
        matches!(
            self,
            Command::ConfigChanged | Command::RelationCreated | Command::RelationBroken
        )
    }
}

enum Output {
    Json(Value),
    Lines(Vec<String>),
    Nothing,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    init_logging(&LoggingConfig {
        level: DEFAULT_LOG_LEVEL,
        format: cli.log_format,
    })?;

    let channel = if cli.related {
        MemoryChannel::related()
    } else {
        MemoryChannel::unrelated()
    };
    let mut helper = AuthHelper::new(cli.config.clone(), channel, MemoryStatus::default());

    // The action result goes out first: a created password must reach the
    // caller even if reporting fails afterwards.
    let outcome = dispatch(&cli.command, &mut helper);
    if let Ok(output) = &outcome {
        emit(output)?;
    }

    report_status(&helper)?;
    match write_relation_data(cli, &helper) {
        // Publishing is the whole point of an event.
        Err(err) if outcome.is_ok() && cli.command.is_event() => return Err(err),
        Err(err) => {
            warn!(error = %err, "relation data not written");
            eprintln!("warning: relation data not written: {err}");
        }
        Ok(()) => {}
    }
    outcome.map(|_| ())
}

fn dispatch(command: &Command, helper: &mut Helper) -> Result<Output, AppError> {
    Ok(match command {
        Command::Validate => Output::Json(serde_json::to_value(helper.validate_config()?)?),
        Command::ConfigChanged => {
            helper.on_config_changed()?;
            Output::Nothing
        }
        Command::RelationCreated => {
            helper.on_relation_created()?;
            Output::Nothing
        }
        Command::RelationBroken => {
            helper.on_relation_broken();
            Output::Nothing
        }
        Command::CreateUser { username } => {
            Output::Json(serde_json::to_value(helper.create_user(username)?)?)
        }
        Command::RemoveUser { username } => {
            Output::Json(serde_json::to_value(helper.remove_user(username)?)?)
        }
        Command::ListUsers => Output::Json(serde_json::to_value(helper.list_users()?)?),
        Command::VerifyUser { username } => {
            let mut line = Zeroizing::new(String::new());
            io::stdin().read_line(&mut line)?;
            let password = line.trim_end_matches(['\r', '\n']);
            let valid = helper.verify_user(username, password)?;
            Output::Json(json!({ "username": username, "valid": valid }))
        }
        Command::RenderSquidConfig { tools_dir } => {
            let candidates: Vec<PathBuf> = match tools_dir {
                Some(dir) => vec![dir.clone()],
                None => SQUID_TOOLS_DIRS.iter().map(PathBuf::from).collect(),
            };
            Output::Lines(helper.render_squid_config(&candidates)?)
        }
    })
}

fn emit(output: &Output) -> Result<(), AppError> {
    match output {
        Output::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Lines(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Output::Nothing => {}
    }
    Ok(())
}

fn report_status(helper: &Helper) -> Result<(), AppError> {
    if let Some(status) = helper.status().current() {
        eprintln!("{}", serde_json::to_string(status)?);
    }
    Ok(())
}

/// Writes the last published relation data to `--relation-data`, or to stdout
/// for events.
fn write_relation_data(cli: &Cli, helper: &Helper) -> Result<(), AppError> {
    let Some(records) = helper.relation().last() else {
        return Ok(());
    };
    let rendered = serde_json::to_string_pretty(&to_json(records))?;
    match &cli.relation_data {
        Some(path) => fs::write(path, format!("{rendered}\n"))?,
        None if cli.command.is_event() => println!("{rendered}"),
        None => debug!("relation data updated; pass --relation-data to capture it"),
    }
    Ok(())
}
