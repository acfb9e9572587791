//! `depot-bridge` command line: locator parsing, configuration and an
//! in-memory round trip.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use depot_bridge::progress::TracingProgress;
use depot_bridge::{BridgeConfig, DepotBridge, Locator, SessionId, SubmitOutcome};
use depot_memory::MemoryDepot;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Command::new("depot-bridge")
        .version(depot_bridge::VERSION)
        .about("Read and submit depot files by locator")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("demo")
                .about("Login, write and read back through an in-memory depot")
                .arg(
                    Arg::new("locator")
                        .long("locator")
                        .required(true)
                        .help("Resource locator, e.g. perforce://localhost:1666//depot/sample.txt"),
                )
                .arg(
                    Arg::new("content")
                        .long("content")
                        .required(true)
                        .help("Bytes to submit"),
                )
                .arg(
                    Arg::new("user")
                        .long("user")
                        .default_value("demo")
                        .help("Principal to log in as"),
                )
                .arg(
                    Arg::new("password")
                        .long("password")
                        .default_value("demo")
                        .help("Secret for the principal"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Content the file holds before the write"),
                )
                .arg(
                    Arg::new("no-overwrite")
                        .long("no-overwrite")
                        .action(ArgAction::SetTrue)
                        .help("Leave an existing file untouched"),
                ),
        )
        .subcommand(
            Command::new("parse")
                .about("Show the server and repository path a locator names")
                .arg(Arg::new("locator").required(true).help("Resource locator"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"));

    let matches = cli.get_matches();
    let config = load_config(&matches)?;
    tracing::debug!(?config, "configuration loaded");

    match matches.subcommand() {
        Some(("demo", args)) => demo(args, config).await,
        Some(("parse", args)) => parse(args),
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn load_config(matches: &ArgMatches) -> Result<BridgeConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(BridgeConfig::new()),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

async fn demo(args: &ArgMatches, config: BridgeConfig) -> Result<()> {
    let locator = required(args, "locator")?;
    let content = required(args, "content")?;
    let user = required(args, "user")?;
    let password = required(args, "password")?;
    let overwrite = !args.get_flag("no-overwrite");

    let parsed = Locator::parse(locator)?;
    let depot = MemoryDepot::new().with_user(user, password);
    if let Some(seed) = args.get_one::<String>("seed") {
        depot.seed_file(parsed.path().as_str(), seed.as_bytes());
    }

    let bridge =
        DepotBridge::new(Arc::new(depot.clone()), &config)?.with_progress(Arc::new(TracingProgress));
    let session = SessionId::new("depot-cli");
    bridge.login(&session, locator, user, password).await?;

    match bridge
        .write_with_policy(&session, locator, content.as_bytes(), overwrite)
        .await?
    {
        SubmitOutcome::Submitted {
            changelist,
            action,
            workspace,
            ..
        } => println!("Submitted change {changelist} ({action:?}) from workspace {workspace}"),
        SubmitOutcome::NoOp { workspace } => {
            println!("File exists and overwrite is off; nothing submitted (workspace {workspace})");
        }
    }

    let mut stream = bridge.read(&session, locator).await?;
    let mut text = String::new();
    stream
        .read_to_string(&mut text)
        .await
        .context("reading depot content")?;

    println!("Head of {}: {text}", parsed.path());
    println!("Revisions: {}", depot.revisions(parsed.path().as_str()).len());
    println!("Workspaces left: {}", depot.workspaces().len());
    Ok(())
}

fn parse(args: &ArgMatches) -> Result<()> {
    let locator = Locator::parse(required(args, "locator")?)?;
    let server = locator.server();

    if args.get_flag("json") {
        let out = json!({
            "secure": server.is_secure(),
            "host": server.host(),
            "port": server.port(),
            "address": server.address(),
            "path": locator.path().as_str(),
            "canonical": locator.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Server:  {server}");
        println!("Address: {}", server.address());
        println!("Path:    {}", locator.path());
    }
    Ok(())
}
