//! Server-side maintenance commands.
//!
//! `batchdesk admin sync-files`, `batchdesk admin missing`, etc.

use anyhow::Result;
use batchdesk::{DeskConfig, Maintenance};

use super::{connect, connect_loaded};

fn print_report(report: &Maintenance, output_json: bool) -> Result<()> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for row in &report.results {
        let id = row.get("batch_id").and_then(|v| v.as_str()).unwrap_or("?");
        println!("  {}  {}", id, row);
    }
    Ok(())
}

pub async fn check_files(config: &DeskConfig, output_json: bool) -> Result<()> {
    let check = connect(config).check_files().await?;
    if output_json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }
    println!("{} files stored.", check.total_files);
    for (batch, files) in &check.batch_patterns {
        println!("  {:14} {}", batch, files.join(", "));
    }
    Ok(())
}

pub async fn missing(config: &DeskConfig, output_json: bool) -> Result<()> {
    let missing = connect(config).missing().await?;
    if output_json {
        println!("{}", serde_json::to_string_pretty(&missing)?);
        return Ok(());
    }
    for id in &missing.ids {
        println!("{}", id);
    }
    Ok(())
}

pub async fn sync_files(config: &DeskConfig, output_json: bool) -> Result<()> {
    let report = connect_loaded(config).await?.sync_files().await?;
    print_report(&report, output_json)
}

pub async fn auto_create(config: &DeskConfig, output_json: bool) -> Result<()> {
    let report = connect_loaded(config).await?.auto_create().await?;
    print_report(&report, output_json)
}

pub async fn init(config: &DeskConfig, output_json: bool) -> Result<()> {
    let report = connect_loaded(config).await?.init_batches().await?;
    print_report(&report, output_json)
}
