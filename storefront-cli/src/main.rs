//! Storefront CLI
//!
//! Installs Mac App Store apps by driving the App Store UI, or through `mas`.
//!
//! Usage:
//!   storefront install "Example App"             # Install through the App Store UI
//!   storefront install "Example App" --via mas   # Install with the mas command-line tool
//!   storefront upgrade "Example App"             # Install or upgrade with mas
//!   storefront status "Example App"              # Purchased / installed / signed out
//!   storefront version "Example App"             # Latest version on the store page
//!   storefront dump --depth 8                    # Accessibility tree of the App Store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storefront::config::parse_duration;
use storefront::{
    AccessibilityClient, InstallRequest, InstalledState, InstallerConfig, MasRegistry,
    Orchestrator,
};
use tracing::{debug, info};

mod report;

use report::RunReport;

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "🛒 Storefront CLI - App Store installs without the clicking")]
#[command(
    long_about = "Storefront installs Mac App Store apps by driving the App Store through the accessibility API, \
    or through the mas command-line tool. The process needs accessibility access."
)]
struct Cli {
    /// YAML configuration file
    #[clap(long, short, env = "STOREFRONT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[clap(long, short, global = true)]
    verbose: bool,

    /// Run mas as this user through sudo
    #[clap(long, env = "STOREFRONT_SYSTEM_USER", global = true)]
    system_user: Option<String>,

    /// Wrap mas in reattach-to-user-namespace
    #[clap(long, env = "STOREFRONT_USE_RTUN", global = true)]
    use_rtun: bool,

    /// Print the result as JSON
    #[clap(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lower")]
enum InstallVia {
    /// Drive the App Store window
    #[default]
    Ui,
    /// Use the mas command-line tool
    Mas,
}

#[derive(Parser, Debug)]
struct InstallArgs {
    /// App name exactly as shown in Purchases
    app: String,

    /// How long to wait for the install to finish (e.g. 90s, 10m)
    #[clap(long, short, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    #[clap(long, value_enum, default_value_t = InstallVia::Ui)]
    via: InstallVia,
}

#[derive(Parser, Debug)]
struct AppArgs {
    /// App name exactly as shown in Purchases
    app: String,
}

#[derive(Parser, Debug)]
struct DumpArgs {
    /// Maximum depth of the dumped tree
    #[clap(long, short, default_value_t = 12)]
    depth: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Install an app that is already purchased
    Install(InstallArgs),
    /// Install an app, or upgrade it if mas reports a newer version
    Upgrade(AppArgs),
    /// Show whether an app is purchased and installed
    Status(AppArgs),
    /// Show the latest version listed on the app's store page
    Version(AppArgs),
    /// Print the App Store's accessibility tree as JSON
    Dump(DumpArgs),
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn load_config(cli: &Cli) -> Result<InstallerConfig> {
    let mut config = match &cli.config {
        Some(path) => InstallerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => InstallerConfig::default(),
    };
    if let Some(user) = &cli.system_user {
        config.mas.system_user = Some(user.clone());
    }
    if cli.use_rtun {
        config.mas.use_rtun = true;
    }
    Ok(config)
}

/// Runs UI automation off the async runtime; every wait in it sleeps.
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Automation task panicked")?
}

async fn install(config: InstallerConfig, args: InstallArgs) -> Result<RunReport> {
    let start = Instant::now();
    let registry = MasRegistry::new(config.mas.clone());

    if args.via == InstallVia::Mas {
        let app = args.app.clone();
        let changed = blocking(move || Ok(registry.install(&app)?)).await?;
        return Ok(changed_report("install", &args.app, changed, start.elapsed()));
    }

    let settings = config.validate().context("Invalid configuration")?;
    let mut request = InstallRequest::new(args.app.clone());
    if let Some(timeout) = args.timeout {
        request = request.with_timeout(timeout);
    }
    info!(app = %request.app_name, "Installing through the App Store");

    let result = blocking(move || {
        let mut orchestrator = Orchestrator::system(settings, Arc::new(registry))?;
        Ok(orchestrator.install(&request))
    })
    .await?;

    Ok(match result {
        Ok(outcome) => RunReport::from_outcome(&outcome, start.elapsed()),
        Err(e) => RunReport::from_install_error(&args.app, &e, start.elapsed()),
    })
}

fn changed_report(command: &str, app: &str, changed: bool, elapsed: Duration) -> RunReport {
    if changed {
        RunReport::success(command, Some(app), format!("'{app}' installed with mas"), elapsed)
    } else {
        RunReport::unchanged(command, app, format!("'{app}' is already up to date"), elapsed)
    }
}

async fn upgrade(config: InstallerConfig, args: AppArgs) -> Result<RunReport> {
    let start = Instant::now();
    let registry = MasRegistry::new(config.mas);
    let app = args.app.clone();
    let changed = blocking(move || Ok(registry.upgrade(&app)?)).await?;
    Ok(changed_report("upgrade", &args.app, changed, start.elapsed()))
}

async fn status(config: InstallerConfig, args: AppArgs) -> Result<RunReport> {
    let start = Instant::now();
    let settings = config.validate().context("Invalid configuration")?;
    let registry = Arc::new(MasRegistry::new(config.mas));
    let app = args.app.clone();

    let (state, upgradable) = blocking(move || {
        let mut orchestrator = Orchestrator::system(settings, registry.clone())?;
        let state = orchestrator.inspect(&app)?;
        let upgradable = registry.upgradable(&app)?;
        Ok((state, upgradable))
    })
    .await?;
    debug!(?state, upgradable, "inspected");

    let mut report = RunReport::from_state(&args.app, state, start.elapsed());
    report.data = Some(serde_json::json!({ "state": state, "upgradable": upgradable }));
    Ok(report)
}

async fn version(config: InstallerConfig, args: AppArgs) -> Result<RunReport> {
    let start = Instant::now();
    let settings = config.validate().context("Invalid configuration")?;
    let registry = Arc::new(MasRegistry::new(config.mas));
    let app = args.app.clone();

    let latest = blocking(move || {
        let mut orchestrator = Orchestrator::system(settings, registry)?;
        Ok(orchestrator.latest_version(&app)?)
    })
    .await?;

    let message = match &latest {
        Some(v) => format!("'{}' {v} is available", args.app),
        None => format!("no version listed for '{}'", args.app),
    };
    Ok(RunReport::success("version", Some(&args.app), message, start.elapsed())
        .with_data(latest.map(serde_json::Value::String)))
}

async fn dump(config: InstallerConfig, args: DumpArgs) -> Result<RunReport> {
    let start = Instant::now();
    let bundle_id = config.bundle_id.clone();

    let tree = blocking(move || {
        let client = AccessibilityClient::new()?;
        let app = client
            .application(&bundle_id)?
            .with_context(|| format!("{bundle_id} is not running"))?;
        let tree = client.tree(&app, args.depth)?;
        info!(nodes = tree.node_count(), "Captured accessibility tree");
        Ok(serde_json::to_value(&tree)?)
    })
    .await?;

    Ok(RunReport::success(
        "dump",
        None,
        format!("accessibility tree of {}", config.bundle_id),
        start.elapsed(),
    )
    .with_data(Some(tree)))
}

fn command_name(command: &Commands) -> (&'static str, Option<String>) {
    match command {
        Commands::Install(a) => ("install", Some(a.app.clone())),
        Commands::Upgrade(a) => ("upgrade", Some(a.app.clone())),
        Commands::Status(a) => ("status", Some(a.app.clone())),
        Commands::Version(a) => ("version", Some(a.app.clone())),
        Commands::Dump(_) => ("dump", None),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let start = Instant::now();
    let (name, app) = command_name(&cli.command);
    let json = cli.json;

    let result = match load_config(&cli) {
        Ok(config) => match cli.command {
            Commands::Install(args) => install(config, args).await,
            Commands::Upgrade(args) => upgrade(config, args).await,
            Commands::Status(args) => status(config, args).await,
            Commands::Version(args) => version(config, args).await,
            Commands::Dump(args) => dump(config, args).await,
        },
        Err(e) => Err(e),
    };

    let report = result.unwrap_or_else(|e| RunReport::from_error(name, app.as_deref(), &e, start.elapsed()));
    if json {
        report.print_json();
    } else {
        report.display();
    }

    if report.is_failure() {
        std::process::exit(1);
    }
}
