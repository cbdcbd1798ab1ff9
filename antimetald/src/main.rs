use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use antimetald::collector::{registry, MetricKind};
use antimetald::config::{Config, RuntimeConfig};
use antimetald::manager::Manager;

#[derive(Parser, Debug)]
#[command(name = "antimetald")]
#[command(about = "Antimetal host telemetry agent")]
struct Args {
    /// Path to config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Collect one metric kind, print it as JSON, and exit
    #[arg(long, value_name = "KIND")]
    oneshot: Option<String>,
    /// Timeout for --oneshot, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    /// Print the registered collectors and their capabilities, then exit
    #[arg(long)]
    list: bool,
    /// Node identity override (falls back to NODE_NAME, then the host name)
    #[arg(long)]
    node_name: Option<String>,
    /// Cluster identity attached to snapshots
    #[arg(long)]
    cluster_name: Option<String>,
    /// Polling interval override in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut collection = config.collection.clone();
    if let Some(interval_ms) = args.interval_ms {
        collection.interval_ms = interval_ms;
    }

    // The exec tracer resolves its object through ANTIMETAL_BPF_PATH; a
    // config-file path participates via the same channel, losing only to an
    // explicitly exported variable.
    if let Some(path) = &config.bpf.object_path {
        if std::env::var_os("ANTIMETAL_BPF_PATH").is_none() {
            std::env::set_var("ANTIMETAL_BPF_PATH", path);
        }
    }

    let manager = Manager::new(collection, args.node_name, args.cluster_name)
        .context("invalid collection configuration")?;

    if args.list {
        for kind in registry::registered_kinds() {
            let collector = registry::build(kind, manager.config())
                .with_context(|| format!("building {kind} collector"))?;
            println!(
                "{kind}: {}",
                serde_json::to_string(&collector.capabilities())?
            );
        }
        return Ok(());
    }

    if let Some(kind) = args.oneshot {
        let kind: MetricKind = kind.parse()?;
        let payload = manager
            .collect_once(kind, Duration::from_secs(args.timeout_secs))
            .await?;
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    info!("[antimetald] starting on node {}", manager.node_name());
    match antimetald::hostinfo::boot_time_secs(&manager.config().host_proc) {
        Ok(boot_time) => info!(
            "[antimetald] boot_time={boot_time} user_hz={} page_size={}",
            antimetald::hostinfo::user_hz(&manager.config().host_proc),
            antimetald::hostinfo::page_size(&manager.config().host_proc),
        ),
        Err(err) => warn!("[antimetald] boot time unavailable: {err}"),
    }

    let mut manager = manager;
    manager.init_collectors();

    let cancel = CancellationToken::new();
    manager.start(&cancel);
    for (kind, status, error) in manager.statuses() {
        match error {
            Some(err) => warn!("[antimetald] {kind}: {status} ({err})"),
            None => info!("[antimetald] {kind}: {status}"),
        }
    }

    spawn_resource_monitor(config.runtime.clone());

    // Periodic snapshot heartbeat for operators tailing the log.
    {
        let store = manager.store();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(10)).await;
                let snapshot = store.snapshot();
                debug!(
                    "[antimetald] snapshot: {} kinds, {} runs",
                    snapshot.metrics.len(),
                    snapshot.runs.len()
                );
            }
        });
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("[antimetald] SIGINT received"),
        _ = sigterm.recv() => info!("[antimetald] SIGTERM received"),
    }

    info!("[antimetald] shutting down");
    cancel.cancel();
    manager.stop();
    Ok(())
}

/// Watch the agent's own CPU and RSS against the configured targets; the
/// agent must stay a rounding error on the host it observes.
fn spawn_resource_monitor(runtime: RuntimeConfig) {
    tokio::spawn(async move {
        use procfs::{page_size, process::Process, ticks_per_second};
        let ticks = ticks_per_second() as f64;
        let page_kb = page_size() / 1024;
        let mut prev_total = 0u64;
        loop {
            if let Ok(stat) = Process::myself().and_then(|proc| proc.stat()) {
                let total = stat.utime + stat.stime;
                let dt = total.saturating_sub(prev_total);
                prev_total = total;
                let cpu_pct = (dt as f64 / ticks) * 100.0;
                let rss_mb = stat.rss * page_kb / 1024;
                if cpu_pct > runtime.cpu_target_pct as f64 {
                    warn!(
                        "[antimetald] cpu usage {:.1}% exceeds target {}",
                        cpu_pct, runtime.cpu_target_pct
                    );
                }
                if rss_mb > runtime.rss_cap_mb {
                    warn!(
                        "[antimetald] rss {}MB exceeds cap {}",
                        rss_mb, runtime.rss_cap_mb
                    );
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
    });
}
