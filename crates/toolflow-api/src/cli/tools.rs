//! `toolflow tools`: handshake with a configured server and list its tools.

use std::time::Duration;

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn list_server_tools(state: &AppState, server: &str, json: bool) -> Result<()> {
    if !state.sessions.has_server(server) {
        let known = state.sessions.server_ids();
        if known.is_empty() {
            bail!("Unknown server '{server}': no servers are configured");
        }
        bail!("Unknown server '{server}' (configured: {})", known.join(", "));
    }

    let timeout = Duration::from_secs(state.config.engine.default_timeout_secs);
    let info = state.sessions.handshake(server).await?;
    let tools = state.sessions.list_tools(server, timeout).await?;
    state.sessions.retire(server);

    if json {
        let out = serde_json::json!({
            "server": server,
            "server_info": info.server_info,
            "protocol_version": info.protocol_version,
            "tools": tools,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} {} (protocol {})",
        style(server).cyan().bold(),
        info.server_info.name,
        style(&info.server_info.version).dim(),
        info.protocol_version
    );

    if tools.is_empty() {
        println!();
        println!("  No tools advertised.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Tool").fg(Color::Cyan), Cell::new("Description")]);
    for tool in &tools {
        table.add_row(vec![
            Cell::new(&tool.name),
            Cell::new(tool.description.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
