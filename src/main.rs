//! alopexd daemon entrypoint
//!
//! Startup order matters: logging, configuration, then capability
//! enforcement *before* anything starts serving. A failed or unverifiable
//! capability drop aborts the process with a non-zero status; running a
//! network daemon with excess privilege is the failure mode this whole
//! subsystem exists to prevent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use alopexd::audit::AuditSink;
use alopexd::config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use alopexd::metrics;
use alopexd::monitor::{self, EventChannel, KernelMonitor, PrivilegeTracker, RateLimiter};
use alopexd::security::SecurityOrchestrator;
use alopexd::tracing::{init_tracing, shutdown_tracing};

/// How often idle rate counters are pruned.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ALOPEXD_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match DaemonConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("alopexd: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_tracing("alopexd", config.otlp_endpoint.as_deref()) {
        eprintln!("alopexd: failed to initialize tracing: {}", e);
        std::process::exit(2);
    }
    metrics::init();

    info!(
        level = %config.security_level,
        config = %config_path,
        "ALOPEX secure control core starting"
    );

    let audit = Arc::new(AuditSink::new());
    let orchestrator = Arc::new(
        SecurityOrchestrator::new(config.security_level, Arc::clone(&audit))
            .with_max_events_override(config.max_events_per_window),
    );

    // The one non-recoverable failure: unverifiable privilege reduction
    if let Err(e) = orchestrator.enforce_capabilities() {
        error!(error = %e, "aborting before serving");
        shutdown_tracing();
        std::process::exit(1);
    }

    let channel = Arc::new(EventChannel::new(config.event_channel_capacity));
    let rate = Arc::new(RateLimiter::new(config.rate_window()));
    let privileges = Arc::new(PrivilegeTracker::new(config.escalation_gap()));

    // Hook surface; the kernel-side binding (eBPF loader / netlink socket
    // host) drives these observation points and is a separate collaborator
    let _hooks = Arc::new(KernelMonitor::new(
        Arc::clone(&channel),
        Arc::clone(&rate),
        Arc::clone(&privileges),
        Arc::clone(&orchestrator),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let drain = tokio::spawn(monitor::run_drain(
        Arc::clone(&channel),
        Arc::clone(&orchestrator),
        Arc::clone(&audit),
        shutdown_rx.clone(),
    ));

    let maintenance = {
        let rate = Arc::clone(&rate);
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = rate.prune_idle(MAINTENANCE_INTERVAL);
                        if removed > 0 {
                            info!(removed, "pruned idle rate counters");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    info!("alopexd serving; press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    channel.close();

    // Drain task finishes buffered events before exiting
    let _ = drain.await;
    let _ = maintenance.await;

    info!(
        audit_records = audit.len(),
        dropped_events = channel.dropped_count(),
        "alopexd stopped"
    );
    shutdown_tracing();
}
