//! Roster commands.

use anyhow::Result;
use batchdesk::{DeskConfig, NewMember};

use super::{connect, connect_loaded};

/// Members with counts over the first page of batches.
pub async fn list(config: &DeskConfig, output_json: bool) -> Result<()> {
    let desk = connect_loaded(config).await?;
    let members = desk.member_stats().await?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&members)?);
        return Ok(());
    }
    if members.is_empty() {
        println!("No team members.");
        println!("Run: batchdesk team add <name>");
        return Ok(());
    }
    println!("{:24} {:>8} {:>10}", "NAME", "BATCHES", "COMPLETED");
    for m in &members {
        println!("{:24} {:>8} {:>10}", m.name, m.batches, m.completed);
    }
    Ok(())
}

pub async fn add(config: &DeskConfig, name: &str, role: &str, email: &str) -> Result<()> {
    let member = NewMember {
        name: name.trim().to_string(),
        role: role.to_string(),
        email: email.to_string(),
    };
    connect(config).add_member(member).await?;
    Ok(())
}

pub async fn remove(config: &DeskConfig, name: &str) -> Result<()> {
    connect(config).remove_member(name).await?;
    Ok(())
}
