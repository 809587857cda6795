use crate::classifier::{DEFAULT_CONNECT, Rspamc};
use crate::dispatch::DEFAULT_THREADS;
use crate::error::ConfigError;
use crate::signal::{FLAG_SHUTDOWN, install_signal_handler};
use crate::summary::EXIT_FATAL;
use crate::verdict::COMMON_ACTIONS;
use crate::{ActionMap, Config, run};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;

fn parse_log_level(s: &str) -> Result<Level, String> {
    match s.to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARNING" | "WARN" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        _ => Err(format!("invalid log level: {s}")),
    }
}

fn parse_positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err(format!("{s} is an invalid positive int value")),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "Runs rspamc over files/directories and places detected spam/ham in specified output directories."
)]
pub struct Cli {
    /// Files or directories containing emails to check. Can be given repeatedly.
    #[arg(long, required = true, num_args = 1..)]
    pub emails: Vec<PathBuf>,

    /// Move emails with rspamd 'Action: ...' output ACTION into directory DIR.
    #[arg(
        long,
        num_args = 2,
        value_names = ["ACTION", "DIR"],
        action = clap::ArgAction::Append,
        long_help = action_help()
    )]
    pub action_to_dir: Vec<String>,

    /// Move emails not matching any --action-to-dir into this directory.
    /// If not given, they are not moved.
    #[arg(long, value_name = "DIR")]
    pub others_dir: Option<PathBuf>,

    /// Do not move any files, only perform read-only actions.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of worker threads.
    #[arg(long, default_value_t = DEFAULT_THREADS, value_parser = parse_positive)]
    pub threads: usize,

    /// Seconds to wait for one rspamc run before giving up on the file.
    #[arg(long, value_name = "SECONDS", default_value_t = 60, value_parser = parse_positive)]
    pub timeout: usize,

    /// rspamc program to run.
    #[arg(long, value_name = "PROGRAM", default_value = "rspamc")]
    pub rspamc: PathBuf,

    /// Extra argument for rspamc, placed before all others. Can be given repeatedly.
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub rspamc_arg: Vec<String>,

    /// Controller socket or host passed to rspamc with -h. Empty to omit -h.
    #[arg(long, value_name = "SOCKET|HOST", default_value = DEFAULT_CONNECT)]
    pub connect: String,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL.
    #[arg(long, value_name = "LEVEL", default_value = "WARNING", value_parser = parse_log_level)]
    pub log_level: Level,
}

fn action_help() -> String {
    let common = COMMON_ACTIONS
        .iter()
        .map(|a| format!("'{a}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Move emails with rspamd 'Action: ...' output ACTION into directory DIR. \
         Can be given multiple times, once for each action. Common actions: {common}. \
         Example: --action-to-dir \"no action\" /var/vmail/example.com/mail/.Unclassified/cur"
    )
}

impl Cli {
    pub fn action_map(&self) -> Result<ActionMap, ConfigError> {
        let pairs = self
            .action_to_dir
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), PathBuf::from(&pair[1])));
        ActionMap::new(pairs, self.others_dir.clone())
    }

    pub fn rspamc(&self) -> Rspamc {
        Rspamc {
            program: self.rspamc.clone(),
            args: self.rspamc_arg.clone(),
            connect: Some(self.connect.clone()).filter(|c| !c.is_empty()),
            timeout: Duration::from_secs(self.timeout as u64),
        }
    }
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run with already parsed arguments. Errors are fatal configuration problems.
pub fn run_cli(cli: &Cli) -> Result<ExitCode, Box<dyn Error>> {
    let rspamc = cli.rspamc();
    let config = Config {
        emails: cli.emails.clone(),
        action_map: cli.action_map()?,
        classifier: &rspamc,
        threads: cli.threads,
        dry_run: cli.dry_run,
    };
    config.validate()?;
    install_signal_handler()?;
    let summary = run(&config, &FLAG_SHUTDOWN)?;
    print!("{}", summary.report());
    Ok(summary.exit_code())
}

pub fn xmain() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    match run_cli(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

#[test]
fn test_parse_args() {
    let cli = Cli::try_parse_from([
        "rspamd-move",
        "--emails",
        "/m/cur",
        "/m/new",
        "--action-to-dir",
        "reject",
        "/spam",
        "--action-to-dir",
        "add header",
        "/maybe",
        "--log-level",
        "info",
        "--threads",
        "4",
    ])
    .unwrap();
    assert_eq!(cli.emails, [PathBuf::from("/m/cur"), PathBuf::from("/m/new")]);
    assert_eq!(cli.threads, 4);
    assert_eq!(cli.log_level, Level::INFO);
    assert!(!cli.dry_run);
    let map = cli.action_map().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(
        map.route("add header"),
        crate::Destination::Directory(std::path::Path::new("/maybe"))
    );
    let rspamc = cli.rspamc();
    assert_eq!(rspamc.connect.as_deref(), Some(DEFAULT_CONNECT));
    assert_eq!(rspamc.timeout, Duration::from_secs(60));
}

#[test]
fn test_parse_args_errors() {
    // --emails is required
    assert!(Cli::try_parse_from(["rspamd-move"]).is_err());
    // --action-to-dir takes two values
    assert!(Cli::try_parse_from(["rspamd-move", "--emails", "x", "--action-to-dir", "reject"]).is_err());
    assert!(Cli::try_parse_from(["rspamd-move", "--emails", "x", "--threads", "0"]).is_err());
    assert!(Cli::try_parse_from(["rspamd-move", "--emails", "x", "--log-level", "LOUD"]).is_err());
}

#[test]
fn test_log_levels() {
    assert_eq!(parse_log_level("WARNING"), Ok(Level::WARN));
    assert_eq!(parse_log_level("debug"), Ok(Level::DEBUG));
    assert_eq!(parse_log_level("Critical"), Ok(Level::ERROR));
}

#[test]
fn test_duplicate_action_is_fatal() {
    let cli = Cli::try_parse_from([
        "rspamd-move",
        "--emails",
        "x",
        "--action-to-dir",
        "reject",
        "/a",
        "--action-to-dir",
        "reject",
        "/b",
    ])
    .unwrap();
    assert!(run_cli(&cli).is_err());
}

#[test]
fn test_missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mail = dir.path().join("m1");
    std::fs::write(&mail, b"x").unwrap();
    let args: Vec<std::ffi::OsString> = vec![
        "rspamd-move".into(),
        "--emails".into(),
        mail.clone().into(),
        "--action-to-dir".into(),
        "reject".into(),
        dir.path().join("missing").into(),
    ];
    let cli = Cli::try_parse_from(args).unwrap();
    let err = run_cli(&cli).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
    assert!(mail.exists());
}
