//! toolflow CLI and REST API entry point.
//!
//! Binary name: `toolflow`
//!
//! Parses CLI arguments, loads configuration and wires services, then
//! dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;

use cli::run::RunOutput;
use cli::{Cli, Commands};
use state::AppState;
use toolflow_types::run::RunStatus;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,toolflow_core=debug,toolflow_infra=debug,toolflow_api=debug",
        _ => "trace",
    };
    toolflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions and validation don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "toolflow", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }
    if let Commands::Validate { file } = &cli.command {
        cli::validate::validate_file(file, cli.json).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let state = AppState::init(cli.config.as_deref()).await?;
    let outcome = dispatch(&cli, state.clone()).await;

    state.sessions.close_all();
    toolflow_observe::tracing_setup::shutdown_tracing();
    outcome
}

async fn dispatch(cli: &Cli, state: AppState) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Run { file, params } => {
            let output = RunOutput {
                json: cli.json,
                quiet: cli.quiet,
            };
            let status = cli::run::run_file(&state, file, params, output).await?;
            Ok(match status {
                RunStatus::Success => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }

        Commands::Tools { server } => {
            cli::tools::list_server_tools(&state, server, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve { port, host } => {
            let host = host.clone().unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} toolflow API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }
            tracing::info!(%addr, "HTTP server started");

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { .. } | Commands::Completions { .. } => {
            unreachable!("handled before state initialization")
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
