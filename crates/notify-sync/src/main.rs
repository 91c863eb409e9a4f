use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use notify_model::{RecipientRole, UserId};
use notify_sync::ack::{AckStore, Hygiene};
use notify_sync::simulate::{run_simulator, SimulatorConfig};
use notify_sync::{FileLocalStore, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("notify-sync")
        .version(notify_sync::VERSION)
        .about("Notification synchronization diagnostics")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Seed an in-memory store and check badge/list agreement")
                .arg(
                    Arg::new("students")
                        .long("students")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of student identities"),
                )
                .arg(
                    Arg::new("clubs")
                        .long("clubs")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of club identities"),
                )
                .arg(
                    Arg::new("notifications")
                        .long("notifications")
                        .default_value("40")
                        .value_parser(value_parser!(usize))
                        .help("Records seeded per identity"),
                )
                .arg(
                    Arg::new("legacy-ratio")
                        .long("legacy-ratio")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Share of club records without the role field"),
                )
                .arg(
                    Arg::new("excluded-ratio")
                        .long("excluded-ratio")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Share of records tagged with an excluded type"),
                )
                .arg(
                    Arg::new("alias-ratio")
                        .long("alias-ratio")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Share of club records tagged with recipientType only"),
                )
                .arg(
                    Arg::new("cross-role")
                        .long("cross-role")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Student records addressed to each club id"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("mark-read")
                        .long("mark-read")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Items to mark read per identity"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("check-acks")
                .about("Load an ack set from a JSON file and apply hygiene")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Local store file"),
                )
                .arg(Arg::new("user").long("user").required(true).help("User id"))
                .arg(
                    Arg::new("role")
                        .long("role")
                        .default_value("student")
                        .value_parser(["student", "club"])
                        .help("Recipient role"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<SyncConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

async fn simulate(args: &ArgMatches, sync: SyncConfig) -> Result<bool> {
    let config = SimulatorConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        students: *args.get_one::<usize>("students").context("missing --students")?,
        clubs: *args.get_one::<usize>("clubs").context("missing --clubs")?,
        notifications: *args
            .get_one::<usize>("notifications")
            .context("missing --notifications")?,
        legacy_ratio: *args
            .get_one::<f64>("legacy-ratio")
            .context("missing --legacy-ratio")?,
        excluded_ratio: *args
            .get_one::<f64>("excluded-ratio")
            .context("missing --excluded-ratio")?,
        alias_ratio: *args.get_one::<f64>("alias-ratio").context("missing --alias-ratio")?,
        cross_role: *args.get_one::<usize>("cross-role").context("missing --cross-role")?,
        mark_read: *args.get_one::<usize>("mark-read").context("missing --mark-read")?,
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        sync,
        ..SimulatorConfig::default()
    };
    for (flag, ratio) in [
        ("--legacy-ratio", config.legacy_ratio),
        ("--excluded-ratio", config.excluded_ratio),
        ("--alias-ratio", config.alias_ratio),
    ] {
        if !(0.0..=1.0).contains(&ratio) {
            anyhow::bail!("{flag} must be within 0..=1");
        }
    }

    let report = run_simulator(config).await?;
    println!("{}", report.generate_text());
    Ok(report.passed())
}

async fn check_acks(args: &ArgMatches, config: &SyncConfig) -> Result<()> {
    let file = args.get_one::<PathBuf>("file").context("missing --file")?;
    let user = UserId::new(args.get_one::<String>("user").context("missing --user")?.as_str())?;
    let role: RecipientRole = args
        .get_one::<String>("role")
        .context("missing --role")?
        .parse()?;

    let store = AckStore::from_config(Arc::new(FileLocalStore::new(file)), config);
    let load = store.load_report(&user, role).await;

    println!("Key: {}", store.key(&user, role));
    match load.hygiene {
        Hygiene::Missing => println!("Hygiene: nothing persisted"),
        Hygiene::Clean => println!("Hygiene: clean"),
        Hygiene::Purged { removed } => println!("Hygiene: purged {removed} malformed entries"),
        Hygiene::Reset { malformed, total } => {
            println!("Hygiene: reset ({malformed} of {total} entries malformed)");
        }
        Hygiene::Unreadable => println!("Hygiene: unreadable, treated as empty"),
    }
    println!("Entries: {}", load.set.len());
    for id in load.set.iter() {
        println!("  {id}");
    }
    Ok(())
}

fn print_config(args: &ArgMatches, config: &SyncConfig) -> Result<()> {
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", config.to_toml_string()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args, config).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Some(("check-acks", args)) => check_acks(args, &config).await?,
        Some(("config", args)) => print_config(args, &config)?,
        _ => {}
    }
    Ok(())
}
