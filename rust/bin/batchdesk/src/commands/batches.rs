//! Batch commands.
//!
//! `batchdesk list`, `batchdesk set B1 status S`, etc.

use std::path::Path;

use anyhow::Result;
use batchdesk::{
    Batch, BatchField, BatchMetadata, BatchMutation, BatchStatus, DeleteFilter, DeskConfig, NewBatch,
    PageRequest, UploadMode,
};

use super::{confirmation, connect, connect_loaded};

fn parse_status(s: &str) -> Result<BatchStatus> {
    BatchStatus::parse(s).ok_or_else(|| anyhow::anyhow!("Unknown status '{}'. Use NS, FS or S.", s))
}

fn print_table(batches: &[Batch]) {
    println!("{:14} {:16} {:12} {:28} {:10} {}", "ID", "ASSIGNEE", "STATUS", "FOLDER", "DUE", "COMMENTS");
    for b in batches {
        println!(
            "{:14} {:16} {:12} {:28} {:10} {}",
            b.id,
            b.field_text(BatchField::Assignee),
            b.status.label(),
            b.field_text(BatchField::Folder),
            b.field_text(BatchField::DueDate),
            b.field_text(BatchField::Comments),
        );
    }
}

/// GET one page.
pub async fn list(
    config: &DeskConfig,
    page: u32,
    per_page: u32,
    assignee: Option<&str>,
    output_json: bool,
) -> Result<()> {
    let desk = connect(config);
    desk.sync(PageRequest::new(page, per_page)).await?;

    let rows = match assignee {
        Some(name) => desk.cache().filter_by_assignee(name),
        None => desk.cache().snapshot(),
    };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No batches.");
        return Ok(());
    }
    print_table(&rows);
    if let Some(p) = desk.cache().pagination() {
        println!();
        println!("Page {} of {} ({} batches total).", p.page, p.total_pages, p.total);
    }
    Ok(())
}

pub async fn stats(config: &DeskConfig, output_json: bool) -> Result<()> {
    let desk = connect_loaded(config).await?;
    let server = desk.stats().await?;
    let tally = desk.tally();

    if output_json {
        let body = serde_json::json!({ "server": server, "page": tally });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    println!("Total:       {}", server.total);
    println!("Assigned:    {}", server.assigned());
    println!("Unassigned:  {}", server.unassigned);
    for (k, v) in &server.extra {
        println!("{:12} {}", format!("{}:", k), v);
    }
    println!();
    println!("Loaded page: {} batches", tally.total);
    println!("  completed:   {}", tally.completed);
    println!("  in progress: {}", tally.in_progress);
    println!("  pending:     {}", tally.pending);
    Ok(())
}

pub fn new_batch(
    id: Option<String>,
    assignee: Option<String>,
    status: Option<String>,
    folder: Option<String>,
    due_date: Option<String>,
    comments: Option<String>,
) -> Result<NewBatch> {
    let status = status.as_deref().map(parse_status).transpose()?;
    Ok(NewBatch {
        id,
        assignee: assignee.filter(|a| !a.trim().is_empty()),
        status,
        folder,
        comments,
        metadata: BatchMetadata { due_date, ..Default::default() },
    })
}

pub async fn create(config: &DeskConfig, new: NewBatch, output_json: bool) -> Result<()> {
    let desk = connect_loaded(config).await?;
    let created = desk.create(new).await?;
    if output_json {
        println!("{}", serde_json::to_string_pretty(&created)?);
    }
    Ok(())
}

pub async fn set(config: &DeskConfig, id: &str, field: &str, value: &str) -> Result<()> {
    let mutation = BatchMutation::parse(field, value).map_err(anyhow::Error::msg)?;
    let desk = connect_loaded(config).await?;
    desk.edit(id, mutation).await?;
    Ok(())
}

pub async fn delete(config: &DeskConfig, id: &str) -> Result<()> {
    let desk = connect(config);
    desk.delete(id).await?;
    Ok(())
}

pub fn delete_filter(
    id_pattern: String,
    status: Option<String>,
    assignee: String,
    unassigned_only: bool,
) -> Result<DeleteFilter> {
    Ok(DeleteFilter {
        id_pattern,
        status: status.as_deref().map(parse_status).transpose()?,
        assignee,
        unassigned_only,
    })
}

pub async fn delete_by_filter(config: &DeskConfig, filter: DeleteFilter, confirm: Option<String>) -> Result<()> {
    let desk = connect(config);
    // An empty filter is refused before asking anything.
    let typed = if filter.is_empty() {
        None
    } else {
        Some(confirmation(confirm, "Deleting every matching batch")?)
    };
    let deleted = desk.delete_by_filter(&filter, typed.as_deref()).await?;
    tracing::debug!(deleted, "delete-by-filter done");
    Ok(())
}

pub async fn upload(config: &DeskConfig, file: &Path, mode: &str, confirm: Option<String>) -> Result<()> {
    let mode = UploadMode::parse(mode)
        .ok_or_else(|| anyhow::anyhow!("Unknown mode '{}'. Use merge or replace.", mode))?;
    let text = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", file.display(), e))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let typed = if mode.is_destructive() {
        Some(confirmation(confirm, "Replacing all batches")?)
    } else {
        None
    };

    let desk = connect(config);
    desk.upload(&name, &text, mode, typed.as_deref()).await?;
    Ok(())
}

pub async fn export(config: &DeskConfig, out: Option<&Path>) -> Result<()> {
    let desk = connect(config);
    let export = desk.export().await?;
    let dest = out.map(Path::to_path_buf).unwrap_or_else(|| export.filename.clone().into());
    std::fs::write(&dest, &export.bytes)?;
    println!("Saved {} ({} bytes).", dest.display(), export.bytes.len());
    Ok(())
}

pub async fn delete_all(config: &DeskConfig, confirm: Option<String>) -> Result<()> {
    let typed = confirmation(confirm, "Deleting every batch")?;
    let desk = connect(config);
    let report = desk.delete_all(Some(typed.as_str())).await?;
    tracing::debug!(deleted = report.affected, "delete-all done");
    Ok(())
}
