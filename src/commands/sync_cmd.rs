//! Sync CLI commands for pushing the offline queue to the server.

use clap::{Args, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use driftsync_core::connectivity::ConnectivityState;
use driftsync_core::coordinator::{SyncCoordinator, SyncEvent, SyncOutcome};
use driftsync_core::executor::SyncResult;
use driftsync_core::queue::QueueError;

use super::context::SyncContext;
use super::OutputFormat;
use crate::config::Config;

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Output format for the sync result
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show queue and server status
    Status,

    /// Probe the server health endpoint
    Probe,

    /// Keep syncing whenever the server is reachable, until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(&self, context: &SyncContext, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(context, config).await,
            Some(SyncSubcommand::Status) => self.status(context, config).await,
            Some(SyncSubcommand::Probe) => self.probe(config).await,
            Some(SyncSubcommand::Watch) => self.watch(context, config).await,
        }
    }

    async fn sync(&self, context: &SyncContext, config: &Config) -> Result<(), SyncCommandError> {
        let coordinator = coordinator(context, config)?;
        coordinator.queue().reset_stale_syncing().await?;

        let mut events = coordinator.subscribe();
        let progress = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    SyncEvent::Started { total } => {
                        tracing::info!(total, "Syncing {} operation(s)", total)
                    }
                    SyncEvent::Progress(p) => {
                        tracing::debug!(completed = p.completed, total = p.total, "Progress")
                    }
                    SyncEvent::ItemFailed(failed) => {
                        tracing::warn!(id = %failed.id, kind = %failed.kind, "{}", failed.message)
                    }
                    SyncEvent::Completed(_) => break,
                }
            }
        });

        let outcome = coordinator.sync_now().await?;
        progress.abort();

        match (&self.format, outcome) {
            (OutputFormat::Json, outcome) => {
                println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
            }
            (OutputFormat::Text, SyncOutcome::Completed(result)) => print_result(&result),
            (OutputFormat::Text, SyncOutcome::NothingToSync) => println!("Nothing to sync."),
            (OutputFormat::Text, SyncOutcome::AlreadyRunning) => {
                println!("A sync is already running.")
            }
            (OutputFormat::Text, SyncOutcome::Offline) => {
                println!("Server unreachable. Operations stay queued until it is back.")
            }
        }

        Ok(())
    }

    async fn status(&self, context: &SyncContext, config: &Config) -> Result<(), SyncCommandError> {
        let stats = context.queue.stats().await?;
        let pending = context.queue.pending_count().await?;

        if let OutputFormat::Json = self.format {
            let state = match SyncContext::monitor(config) {
                Some(monitor) => Some(monitor.check_connectivity().await),
                None => None,
            };
            let report = serde_json::json!({
                "node_id": context.clock.node_id(),
                "server_url": config.sync.server_url,
                "queue": stats,
                "eligible": pending,
                "connectivity": state,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Sync Status");
        println!("===========");
        println!();
        println!("Node ID:   {}", context.clock.node_id());
        println!(
            "Queue:     {} pending, {} syncing, {} failed, {} conflict",
            stats.pending, stats.syncing, stats.failed, stats.conflict
        );
        println!("Next pass: {} operation(s)", pending);
        println!();

        match SyncContext::monitor(config) {
            None => print_not_configured(),
            Some(monitor) => {
                if let Some(url) = &config.sync.server_url {
                    println!("Server:    {}", url);
                }
                if let Some(key) = &config.redacted().sync.api_key {
                    println!("API Key:   {}", key);
                }
                print_connectivity(&monitor.check_connectivity().await);
            }
        }

        Ok(())
    }

    async fn probe(&self, config: &Config) -> Result<(), SyncCommandError> {
        let monitor = SyncContext::monitor(config).ok_or(SyncCommandError::NotConfigured)?;
        let state = monitor.check_connectivity().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
            OutputFormat::Text => print_connectivity(&state),
        }
        Ok(())
    }

    async fn watch(&self, context: &SyncContext, config: &Config) -> Result<(), SyncCommandError> {
        let coordinator = coordinator(context, config)?;
        let mut events = coordinator.subscribe();
        let mut connectivity = coordinator.monitor().subscribe();

        coordinator.start().await?;
        println!("Watching for changes. Press Ctrl-C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(SyncEvent::Completed(result)) => print_result(&result),
                    Ok(SyncEvent::ItemFailed(failed)) => {
                        tracing::warn!(id = %failed.id, kind = %failed.kind, "{}", failed.message)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
                event = connectivity.recv() => match event {
                    Ok(event) => println!("{}", describe_connectivity(&event)),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }

        coordinator.stop();
        let status = coordinator.status().await?;
        println!();
        println!(
            "Stopped. {} pending, {} failed, {} conflict.",
            status.pending, status.failed, status.conflict
        );
        Ok(())
    }
}

fn coordinator(context: &SyncContext, config: &Config) -> Result<SyncCoordinator, SyncCommandError> {
    context
        .coordinator(config)
        .ok_or(SyncCommandError::NotConfigured)
}

fn describe_connectivity(event: &driftsync_core::connectivity::ConnectivityEvent) -> String {
    use driftsync_core::connectivity::ConnectivityEvent;

    match event {
        ConnectivityEvent::Connected { latency, quality } => {
            format!("Server reachable ({} ms, {})", latency.as_millis(), quality)
        }
        ConnectivityEvent::Disconnected {
            consecutive_failures,
            reason,
        } => format!(
            "Server unreachable: {} ({} failure{})",
            reason,
            consecutive_failures,
            if *consecutive_failures == 1 { "" } else { "s" }
        ),
    }
}

/// JSON report of a sync trigger. `result` is present only for a pass that
/// ran.
fn outcome_json(outcome: &SyncOutcome) -> serde_json::Value {
    match outcome {
        SyncOutcome::Completed(result) => {
            serde_json::json!({ "outcome": "completed", "result": result })
        }
        SyncOutcome::NothingToSync => serde_json::json!({ "outcome": "nothing_to_sync" }),
        SyncOutcome::AlreadyRunning => serde_json::json!({ "outcome": "already_running" }),
        SyncOutcome::Offline => serde_json::json!({ "outcome": "offline" }),
    }
}

fn print_result(result: &SyncResult) {
    println!(
        "Synced {} of {} operation(s).",
        result.success.len(),
        result.total()
    );
    for failed in &result.failed {
        println!("  ✗ {} [{}] {}", failed.id, failed.kind, failed.message);
    }
}

fn print_connectivity(state: &ConnectivityState) {
    if state.is_connected {
        print!("Server status: ✓ reachable");
        if let Some(latency) = state.latency {
            print!(" ({} ms", latency.as_millis());
            if let Some(jitter) = state.jitter {
                print!(", jitter {} ms", jitter.as_millis());
            }
            print!(")");
        }
        println!();
        println!("Quality:       {}", state.quality);
    } else {
        println!(
            "Server status: ✗ unreachable ({} consecutive failure(s))",
            state.consecutive_failures
        );
    }
}

fn print_not_configured() {
    println!("Server:    Not configured");
    println!();
    println!("To enable sync, add to your config file:");
    println!();
    println!("  sync:");
    println!("    server_url: \"http://localhost:8080\"");
    println!("    api_key: \"your-api-key\"");
    println!();
    println!("Or set environment variables:");
    println!("  DRIFTSYNC_SERVER_URL");
    println!("  DRIFTSYNC_API_KEY");
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    Queue(QueueError),
    Output(serde_json::Error),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => write!(
                f,
                "Sync server not configured. Set sync.server_url or DRIFTSYNC_SERVER_URL"
            ),
            SyncCommandError::Queue(e) => write!(f, "{}", e),
            SyncCommandError::Output(e) => write!(f, "Failed to format output: {}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::NotConfigured => None,
            SyncCommandError::Queue(e) => Some(e),
            SyncCommandError::Output(e) => Some(e),
        }
    }
}

impl From<QueueError> for SyncCommandError {
    fn from(e: QueueError) -> Self {
        SyncCommandError::Queue(e)
    }
}

impl From<serde_json::Error> for SyncCommandError {
    fn from(e: serde_json::Error) -> Self {
        SyncCommandError::Output(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::connectivity::{ConnectionQuality, ConnectivityEvent};
    use std::time::Duration;

    #[test]
    fn test_describe_connectivity() {
        let connected = ConnectivityEvent::Connected {
            latency: Duration::from_millis(42),
            quality: ConnectionQuality::Excellent,
        };
        assert_eq!(
            describe_connectivity(&connected),
            "Server reachable (42 ms, excellent)"
        );

        let disconnected = ConnectivityEvent::Disconnected {
            consecutive_failures: 1,
            reason: "HTTP 503".to_string(),
        };
        assert_eq!(
            describe_connectivity(&disconnected),
            "Server unreachable: HTTP 503 (1 failure)"
        );
    }

    #[test]
    fn test_outcome_json_names_outcome() {
        let offline = outcome_json(&SyncOutcome::Offline);
        assert_eq!(offline["outcome"], "offline");
        assert!(offline.get("result").is_none());

        assert_eq!(
            outcome_json(&SyncOutcome::AlreadyRunning)["outcome"],
            "already_running"
        );
        assert_eq!(
            outcome_json(&SyncOutcome::NothingToSync)["outcome"],
            "nothing_to_sync"
        );

        let completed = outcome_json(&SyncOutcome::Completed(SyncResult {
            success: vec!["A".to_string()],
            ..SyncResult::default()
        }));
        assert_eq!(completed["outcome"], "completed");
        assert_eq!(completed["result"]["success"][0], "A");
    }

    #[test]
    fn test_not_configured_message() {
        let message = SyncCommandError::NotConfigured.to_string();
        assert!(message.contains("DRIFTSYNC_SERVER_URL"));
    }
}
