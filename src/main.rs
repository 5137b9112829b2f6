use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use remotescan::config::Config;
use remotescan::gcp::GcpClient;
use remotescan::progress::Progress;
use remotescan::remote::google;
use remotescan::remote::{Cache, RemoteLibrary, Scanner, ScannerOptions};
use remotescan::terraform::{ResourceReader, TerraformProvider};
use remotescan::{Alerter, Resource, TypeFilter};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Enumerate live Google Cloud resources
#[derive(Parser, Debug)]
#[command(name = "remotescan", version = remotescan::VERSION, about, long_about = None)]
struct Args {
    /// GCP project to scan
    #[arg(short, long)]
    project: Option<String>,

    /// Default region, also the default provider alias
    #[arg(short, long)]
    region: Option<String>,

    /// Read every resource's full state through the Terraform provider
    #[arg(long)]
    deep: bool,

    /// Resource type pattern to ignore, `!` negates (repeatable)
    #[arg(long = "ignore", value_name = "PATTERN")]
    ignore: Vec<String>,

    /// Google provider version used in deep mode
    #[arg(long, value_name = "VERSION")]
    tf_provider_version: Option<String>,

    /// Maximum number of concurrent enumerators
    #[arg(long)]
    parallelism: Option<usize>,

    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let directive = level.directive()?;
    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Unable to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("remotescan {} started with log level: {:?}", remotescan::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("remotescan").join("remotescan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".remotescan").join("remotescan.log");
    }
    PathBuf::from("remotescan.log")
}

/// Flags override the config file
fn merge_args(mut config: Config, args: &Args) -> Config {
    if let Some(project) = &args.project {
        config.project_id = Some(project.clone());
    }
    if let Some(region) = &args.region {
        config.region = Some(region.clone());
    }
    if let Some(version) = &args.tf_provider_version {
        config.provider_version = Some(version.clone());
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = Some(parallelism);
    }
    config.ignore.extend(args.ignore.iter().cloned());
    config.deep |= args.deep;
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = merge_args(Config::load(), &args);
    let project = config.effective_project()?;
    let region = config.effective_region();
    let filter = TypeFilter::new(&config.ignore).context("Invalid ignore pattern")?;

    let client = GcpClient::new(&project).await?;
    let cache = Arc::new(Cache::new());
    let progress = Arc::new(Progress::new());

    let provider = if config.deep {
        let plugins_base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let provider = Arc::new(google::terraform_provider(
            &project,
            &region,
            config.provider_version(),
            &plugins_base,
            progress.clone(),
        ));
        provider
            .init()
            .await
            .context("Failed to initialize the google provider")?;
        Some(provider)
    } else {
        None
    };

    let mut library = RemoteLibrary::new();
    google::init(
        &mut library,
        client,
        cache,
        provider.clone().map(|p| p as Arc<dyn ResourceReader>),
    );

    let alerter = Arc::new(Alerter::new());
    let token = CancellationToken::new();
    let scanner = Scanner::new(
        Arc::new(library),
        alerter.clone(),
        ScannerOptions {
            deep: config.deep,
            parallelism: config.parallelism,
        },
        Arc::new(filter),
    )
    .with_cancellation(token.clone());

    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            remotescan::signal::interrupted().await;
            tracing::warn!("Interrupted, cancelling scan");
            token.cancel();
        }
    });

    tracing::info!("Scanning project {} (default region {})", project, region);
    let result = scanner.resources().await;
    interrupt.abort();
    shutdown(provider.as_deref()).await;

    let resources = result.context("Scan failed")?;
    tracing::info!(
        "Scan complete: {} resources, {} details read",
        resources.len(),
        progress.count()
    );

    match args.output {
        OutputFormat::Json => print_json(&resources, &alerter)?,
        OutputFormat::Summary => print_summary(&resources, &alerter),
    }
    Ok(())
}

async fn shutdown(provider: Option<&TerraformProvider>) {
    if let Some(provider) = provider {
        provider.cleanup().await;
    }
}

fn print_json(resources: &[Resource], alerter: &Alerter) -> Result<()> {
    let output = serde_json::json!({
        "resources": resources,
        "alerts": alerter.alerts(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_summary(resources: &[Resource], alerter: &Alerter) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for res in resources {
        *counts.entry(res.resource_type.as_str()).or_default() += 1;
    }

    println!("Found {} resources", resources.len());
    for (ty, count) in counts {
        println!("  {:<45} {}", ty, count);
    }

    let alerts = alerter.alerts();
    if !alerts.is_empty() {
        println!();
        println!("Alerts:");
        for alert in alerts.values().flatten() {
            println!("  - {}", alert.message);
        }
    }
}
