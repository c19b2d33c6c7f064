use std::path::PathBuf;

use anyhow::Context;
use synosyncd::config::Config;
use synosyncd::daemon::{self, DaemonRuntime};
use synosyncd::logging::init_tracing;
use synosyncd::sync::TransferStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Scan(TransferStatus),
    Version,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    mode: CliMode,
    config: Option<PathBuf>,
}

fn parse_cli<I>(args: I) -> anyhow::Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = Cli {
        mode: CliMode::Run,
        config: None,
    };
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            "--once" => cli.mode = CliMode::Once,
            "--scan" => {
                let status = args.next().context("--scan needs a status")?;
                cli.mode = CliMode::Scan(parse_status(&status)?);
            }
            "--version" | "-V" => cli.mode = CliMode::Version,
            "--help" | "-h" => cli.mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(cli)
}

fn parse_status(value: &str) -> anyhow::Result<TransferStatus> {
    match TransferStatus::parse(&value.to_ascii_uppercase()) {
        TransferStatus::Unknown(raw) => {
            anyhow::bail!("unknown status {raw}, expected INIT, NOT_SENT, SENT or FAILED")
        }
        status => Ok(status),
    }
}

fn print_help() {
    println!("Usage: synosyncd [--config <PATH>] [--once | --scan <STATUS>]");
    println!("  -c, --config <PATH>  Config file (default ./config.json, or $SYNOSYNC_CONFIG)");
    println!("      --once           Run a single sync cycle and exit");
    println!("      --scan <STATUS>  List mirrored files in INIT, NOT_SENT, SENT or FAILED");
    println!("  -V, --version        Print version and exit");
    println!("  -h, --help           Show this help");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = parse_cli(std::env::args())?;
    match cli.mode {
        CliMode::Help => {
            print_help();
            return Ok(());
        }
        CliMode::Version => {
            println!("synosyncd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    init_tracing();
    let config_path = Config::resolve_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.mode {
        CliMode::Scan(status) => {
            let records = daemon::scan(&config, &status).await?;
            print!("{}", daemon::render_scan(&records));
            tracing::info!(status = %status, count = records.len(), "scan finished");
            Ok(())
        }
        CliMode::Once => {
            let runtime = DaemonRuntime::bootstrap(config).await?;
            let report = runtime.run_cycle().await?;
            tracing::info!(?report, "sync cycle finished");
            Ok(())
        }
        _ => DaemonRuntime::bootstrap(config).await?.run().await,
    }
}
