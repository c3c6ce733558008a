//! CLI argument parsing and dispatch
//!
//! Handles the command-line interface using clap:
//! - Config bootstrap and schedule editing
//! - Managed path maintenance and temporary exclusions
//! - Daemon control (foreground run, stop, reload)

mod commands;

use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use hourlock::constants::{DAEMON_RUN_SUBCOMMAND, DAEMON_SUBCOMMAND};

const VERSION: &str = concat!(env!("HOURLOCK_VERSION"), " (", env!("GIT_HASH"), ")");

/// Build the command tree
pub fn build_cli() -> Command {
    Command::new("hourlock")
        .version(VERSION)
        .about("Make config files immutable during scheduled hours")
        .long_about(
            "Keeps a set of files and directories immutable while an enforcement window is open \
             and writable outside it. The daemon re-applies locks on manual changes.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("init")
                .about("Create the configuration")
                .args(schedule_args())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing config, keeping its managed paths")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("add")
                .about("Add a file or directory to the managed set")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove a path from the managed set and unlock it")
                .arg(path_arg()),
        )
        .subcommand(Command::new("list").about("List managed paths"))
        .subcommand(Command::new("status").about("Show schedule, window and daemon state"))
        .subcommand(
            Command::new("temp-unlock")
                .about("Temporarily exempt a managed path from enforcement")
                .arg(path_arg())
                .arg(
                    Arg::new("minutes")
                        .short('m')
                        .long("minutes")
                        .value_name("N")
                        .help("Exemption length in minutes (defaults to the configured value)")
                        .value_parser(value_parser!(u32).range(1..)),
                ),
        )
        .subcommand(
            Command::new("schedule")
                .about("Show or change the enforcement schedule")
                .args(schedule_args()),
        )
        .subcommand(
            Command::new(DAEMON_SUBCOMMAND)
                .about("Control the enforcement daemon")
                .subcommand_required(true)
                .subcommand(
                    Command::new(DAEMON_RUN_SUBCOMMAND)
                        .about("Run the daemon in the foreground (for service managers)"),
                )
                .subcommand(Command::new("stop").about("Stop running daemons (unlocks all paths)"))
                .subcommand(Command::new("reload").about("Ask running daemons to reload the config")),
        )
        .subcommand(Command::new("unlock-all").about("Unlock every managed path now"))
}

fn path_arg() -> Arg {
    Arg::new("path")
        .value_name("PATH")
        .help("File or directory path")
        .required(true)
}

fn schedule_args() -> Vec<Arg> {
    vec![
        Arg::new("hours")
            .long("hours")
            .value_name("RANGE")
            .help("Daily window, e.g. 08:00-17:00, 0800-1700 or 8-17")
            .conflicts_with("cron"),
        Arg::new("days")
            .long("days")
            .value_name("DAYS")
            .help("Weekdays, 1 = Monday .. 7 = Sunday, e.g. 1-5 or 1,3,5")
            .conflicts_with("cron"),
        Arg::new("cron")
            .long("cron")
            .value_name("EXPR")
            .help("Cron expression; each trigger arms enforcement for one minute"),
        Arg::new("temp-minutes")
            .long("temp-minutes")
            .value_name("N")
            .help("Default temporary unlock length in minutes")
            .value_parser(value_parser!(u32).range(1..)),
    ]
}

/// Parse the process arguments and run the selected command
pub async fn run() -> Result<()> {
    dispatch(build_cli().get_matches()).await
}

async fn dispatch(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", sub)) => commands::init(&schedule_options(sub), sub.get_flag("force")),
        Some(("add", sub)) => commands::add(path_value(sub)),
        Some(("rm", sub)) => commands::remove(path_value(sub)),
        Some(("list", _)) => commands::list(),
        Some(("status", _)) => commands::status(),
        Some(("temp-unlock", sub)) => {
            commands::temp_unlock(path_value(sub), sub.get_one::<u32>("minutes").copied())
        }
        Some(("schedule", sub)) => commands::schedule(&schedule_options(sub)),
        Some((DAEMON_SUBCOMMAND, sub)) => match sub.subcommand() {
            Some((DAEMON_RUN_SUBCOMMAND, _)) => hourlock::daemon::run_daemon().await,
            Some(("stop", _)) => commands::daemon_stop(),
            Some(("reload", _)) => commands::daemon_reload(),
            _ => anyhow::bail!("Unknown daemon command"),
        },
        Some(("unlock-all", _)) => commands::unlock_all(),
        _ => anyhow::bail!("Unknown command"),
    }
}

fn path_value(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("path")
        .map(String::as_str)
        .unwrap_or_default()
}

/// Schedule-related flags shared by `init` and `schedule`
#[derive(Debug, Default)]
pub struct ScheduleOptions {
    pub hours: Option<String>,
    pub days: Option<String>,
    pub cron: Option<String>,
    pub temp_minutes: Option<u32>,
}

impl ScheduleOptions {
    pub fn is_empty(&self) -> bool {
        self.hours.is_none() && self.days.is_none() && self.cron.is_none() && self.temp_minutes.is_none()
    }
}

fn schedule_options(matches: &ArgMatches) -> ScheduleOptions {
    ScheduleOptions {
        hours: matches.get_one::<String>("hours").cloned(),
        days: matches.get_one::<String>("days").cloned(),
        cron: matches.get_one::<String>("cron").cloned(),
        temp_minutes: matches.get_one::<u32>("temp-minutes").copied(),
    }
}
