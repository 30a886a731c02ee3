//! `toolflow validate`: check a definition and show its execution plan.

use std::path::Path;

use anyhow::Result;
use console::style;
use toolflow_core::workflow::dag::build_execution_plan;

use super::load_definition;

pub async fn validate_file(file: &Path, json: bool) -> Result<()> {
    let definition = load_definition(file).await?;
    let waves: Vec<Vec<String>> = build_execution_plan(&definition)?
        .into_iter()
        .map(|wave| wave.into_iter().map(|node| node.id.clone()).collect())
        .collect();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "name": definition.name,
            "nodes": definition.nodes.len(),
            "servers": definition.servers(),
            "waves": waves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} '{}' is valid ({} nodes, {} waves)",
        style("✓").green().bold(),
        style(&definition.name).cyan(),
        definition.nodes.len(),
        waves.len()
    );
    for (i, wave) in waves.iter().enumerate() {
        println!("    {} {}", style(format!("wave {}:", i + 1)).dim(), wave.join(", "));
    }
    println!(
        "    {} {}",
        style("servers:").dim(),
        definition.servers().join(", ")
    );
    println!();
    Ok(())
}
