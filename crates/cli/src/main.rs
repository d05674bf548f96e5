#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use vigil_core::config::{RuntimeDefaults, METRICS_ADDR_ENV};
use vigil_core::duration::{parse_duration, parse_timeout_override};
use vigil_kubectl::{resolve_target, BackoffPolicy, Kubectl, ProcessRunner, RunOptions};
use vigil_resources::ResourceBuilder;
use vigil_store::SyncMediator;
use vigil_watch::{ResourceWatcher, WatchOptions, WatchReport};

mod manifest;

#[derive(Parser, Debug)]
#[command(name = "vigilctl", version, about = "Apply Kubernetes manifests and wait until they have rolled out")]
struct Cli {
    /// Output format for the final report
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig context (default: current-context)
    #[arg(long, global = true, env = "VIGIL_CONTEXT")]
    context: Option<String>,

    /// Namespace for namespaced resources (default: the context's namespace)
    #[arg(short = 'n', long, global = true, env = "VIGIL_NAMESPACE")]
    namespace: Option<String>,

    /// Give up on everything still pending after this long, e.g. "10m"
    #[arg(long, global = true, value_parser = duration_arg)]
    global_timeout: Option<Duration>,

    /// Replace every resource's own timeout (1s to 24h)
    #[arg(long, global = true, value_parser = timeout_override_arg)]
    resource_timeout: Option<Duration>,

    /// Concurrent syncs per poll
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Pause between polls
    #[arg(long, global = true, value_parser = duration_arg)]
    poll_delay: Option<Duration>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch resources that are already applied
    Watch {
        /// Manifest files or directories
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
    },
    /// `kubectl apply` the manifests, then watch them
    Deploy {
        /// Manifest files or directories
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
    },
}

fn duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration '{}', expected e.g. 45s, 10m, 1h30m", raw))
}

fn timeout_override_arg(raw: &str) -> Result<Duration, String> {
    parse_timeout_override(raw).map_err(|e| format!("invalid timeout '{}': {}", raw, e))
}

fn init_tracing() {
    let env = std::env::var("VIGIL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var(METRICS_ADDR_ENV) {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid {}; expected host:port", METRICS_ADDR_ENV);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "vigilctl failed");
            ExitCode::from(vigil_core::exit::FAILURE as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (files, apply) = match &cli.command {
        Commands::Watch { files } => (files.clone(), false),
        Commands::Deploy { files } => (files.clone(), true),
    };

    let mut defaults = RuntimeDefaults::from_env();
    if let Some(n) = cli.max_workers {
        defaults.max_workers = n.max(1);
    }
    if let Some(d) = cli.poll_delay {
        defaults.poll_delay = d;
    }

    let paths = manifest::expand_paths(&files)?;
    let definitions = manifest::load(&paths)?;
    if definitions.is_empty() {
        bail!("no resources found in {}", render_paths(&files));
    }

    let target = resolve_target(cli.context.as_deref(), cli.namespace.as_deref())?;
    let builder = ResourceBuilder::new(&target.namespace, &target.context).with_timeout_override(cli.resource_timeout);

    // Validate the whole set up front, before anything touches the cluster.
    builder.clone().build_all(definitions.clone())?;

    let kubectl = Kubectl::new(Arc::new(ProcessRunner), &target.namespace, &target.context)
        .with_request_timeout(defaults.kubectl_timeout.clone())
        .with_backoff(BackoffPolicy::new(defaults.backoff_base, defaults.backoff_max));
    let cache = SyncMediator::new(kubectl, defaults.max_workers).with_fetch_attempts(defaults.fetch_attempts);

    if apply {
        apply_manifests(&cache, &paths).await?;
    }

    let mut builder = builder;
    builder.discover_crds(&cache).await;
    let resources = builder.build_all(definitions)?;

    let options = WatchOptions::from_defaults(&defaults).with_global_timeout(cli.global_timeout);
    let watcher = ResourceWatcher::new(&cache, options);
    let report = tokio::select! {
        report = watcher.run(resources) => report,
        _ = signal::ctrl_c() => {
            warn!("interrupted; abandoning the watch");
            return Ok(ExitCode::from(vigil_core::exit::FAILURE as u8));
        }
    };

    print_report(&report, cli.output)?;
    Ok(ExitCode::from(report.exit_code() as u8))
}

async fn apply_manifests(cache: &SyncMediator, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let file = path.to_string_lossy();
        let out = cache
            .kubectl()
            .run(&["apply", "-f", &file], RunOptions::default().log_failure(false))
            .await
            .with_context(|| format!("applying {}", file))?;
        if !out.success {
            bail!("kubectl apply -f {} failed: {}", file, out.stderr.trim());
        }
        info!(file = %file, "applied");
    }
    Ok(())
}

fn print_report(report: &WatchReport, output: Output) -> Result<()> {
    report.log_summary();
    match output {
        Output::Human => print!("{}", report.render()),
        Output::Json => println!("{}", report.to_json().context("serializing report")?),
    }
    Ok(())
}

fn render_paths(files: &[PathBuf]) -> String {
    files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}
