//! `toolflow run`: execute a definition file with live progress.
//!
//! The run goes through the same `RunService` as the HTTP surface; this
//! command subscribes to the event bus and renders the run's events as they
//! arrive. The first Ctrl+C requests cooperative cancellation, a second one
//! stops waiting.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use tokio::sync::broadcast;

use toolflow_types::event::ProgressEvent;
use toolflow_types::run::{ExecutionResult, LogLevel, NodeStatus, RunStatus};
use toolflow_types::workflow::{InvocationRequest, WorkflowSource};

use super::{load_definition, parse_params};
use crate::state::AppState;

/// Output options for a run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutput {
    pub json: bool,
    pub quiet: bool,
}

impl RunOutput {
    fn streams(self) -> bool {
        !self.json && !self.quiet
    }
}

/// Run `file` to completion and return its overall status.
pub async fn run_file(
    state: &AppState,
    file: &Path,
    raw_params: &[String],
    output: RunOutput,
) -> Result<RunStatus> {
    let definition = load_definition(file).await?;
    let params = parse_params(raw_params)?;

    if output.streams() {
        println!();
        println!(
            "  {} Running '{}' ({} nodes)",
            style("▶").bold(),
            style(&definition.name).cyan(),
            definition.nodes.len()
        );
        println!();
    }

    // Subscribe before starting so no event of this run is missed.
    let mut events = state.run_service.subscribe();
    let execution_id = state
        .run_service
        .start(InvocationRequest {
            workflow: WorkflowSource::Inline(definition),
            params,
            execution_id: None,
        })
        .await?;

    let mut interrupts = 0u8;
    let result = loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.execution_id == execution_id => {
                    match event.event {
                        ProgressEvent::Complete { result } => break *result,
                        ProgressEvent::Error { error } => bail!("Run failed to start: {error}"),
                        other => {
                            if output.streams() {
                                if let Some(line) = render_event(&other) {
                                    println!("{line}");
                                }
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "progress renderer lagged");
                    if let Some(result) = state.run_service.result(&execution_id) {
                        break result;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    bail!("Event stream closed before the run finished");
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    bail!("Failed to listen for Ctrl+C: {e}");
                }
                interrupts += 1;
                if interrupts > 1 {
                    bail!("Interrupted before run '{execution_id}' finished cancelling");
                }
                if !output.quiet {
                    eprintln!(
                        "  {} Cancelling (press Ctrl+C again to stop waiting)",
                        style("■").yellow()
                    );
                }
                if let Err(e) = state.run_service.cancel(&execution_id) {
                    tracing::debug!(error = %e, "cancel after run end");
                }
            }
        }
    };

    print_result(&result, output)?;
    Ok(result.status)
}

/// One terminal line for a progress event, if it is worth showing.
fn render_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::NodeState { node_id, status } => {
            let marker = match status {
                NodeStatus::Pending => return None,
                NodeStatus::Running => style("●").blue(),
                NodeStatus::Completed => style("✓").green(),
                NodeStatus::Error => style("✗").red(),
                NodeStatus::Skipped => style("-").dim(),
            };
            Some(format!("  {marker} {node_id} {}", style(status).dim()))
        }
        ProgressEvent::Log { log } => {
            let level = match log.level {
                LogLevel::Debug => return None,
                LogLevel::Info => style("info").dim(),
                LogLevel::Warn => style("warn").yellow(),
                LogLevel::Error => style("error").red(),
            };
            let scope = log
                .node_id
                .as_deref()
                .map(|id| format!("[{id}] "))
                .unwrap_or_default();
            Some(format!("    {level} {scope}{}", log.message))
        }
        ProgressEvent::Complete { .. } | ProgressEvent::Error { .. } => None,
    }
}

fn print_result(result: &ExecutionResult, output: RunOutput) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if output.quiet {
        return Ok(());
    }

    let status = match result.status {
        RunStatus::Success => style(result.status).green().bold(),
        RunStatus::Partial => style(result.status).yellow().bold(),
        RunStatus::Failed => style(result.status).red().bold(),
        RunStatus::Cancelled => style(result.status).dim().bold(),
    };
    println!();
    println!(
        "  Run {} finished: {} in {}ms",
        style(&result.execution_id).dim(),
        status,
        result.duration_ms()
    );
    for error in &result.errors {
        println!("    {} {error}", style("✗").red());
    }
    if !result.results.is_empty() {
        println!();
        println!("{}", serde_json::to_string_pretty(&result.results)?);
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolflow_types::run::LogEntry;

    #[test]
    fn pending_and_debug_are_hidden() {
        assert!(
            render_event(&ProgressEvent::NodeState {
                node_id: "scan".to_string(),
                status: NodeStatus::Pending,
            })
            .is_none()
        );
        assert!(
            render_event(&ProgressEvent::Log {
                log: LogEntry::new(LogLevel::Debug, None, "noise"),
            })
            .is_none()
        );
    }

    #[test]
    fn node_and_log_lines() {
        let line = render_event(&ProgressEvent::NodeState {
            node_id: "scan".to_string(),
            status: NodeStatus::Error,
        })
        .unwrap();
        assert!(line.contains("scan"));
        assert!(line.contains("error"));

        let line = render_event(&ProgressEvent::Log {
            log: LogEntry::new(LogLevel::Warn, Some("scan"), "retrying"),
        })
        .unwrap();
        assert!(line.contains("[scan] retrying"));
    }
}
