//! `batchdesk`: command-line client for the batch-tracking backend.
//!
//! Every command goes through the same `Desk` a dashboard view would use,
//! so gating, reconciliation and notifications behave identically.

mod commands;
mod console;

use std::path::PathBuf;

use batchdesk::{DeskConfig, DeskError};
use clap::{Parser, Subcommand};

/// Batch tracking CLI.
#[derive(Parser, Debug)]
#[command(name = "batchdesk", about = "Batch tracking dashboard client")]
struct Cli {
    /// Path to client config file (default: ~/.batchdesk/config.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Backend base URL, overriding the config file.
    #[arg(long = "server", global = true)]
    server: Option<String>,

    /// Output format: table or json.
    #[arg(long = "output", global = true, default_value = "table")]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List one page of batches.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size (default: from config).
        #[arg(long = "per-page")]
        per_page: Option<u32>,
        /// Only batches assigned to this member.
        #[arg(long)]
        assignee: Option<String>,
    },

    /// Server totals plus status counts for the first page.
    Stats,

    /// Create a batch.
    Create {
        /// Batch id (server assigns one when omitted).
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// NS, FS or S.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        /// YYYY-MM-DD.
        #[arg(long = "due-date")]
        due_date: Option<String>,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Change one field of a batch.
    Set {
        id: String,
        /// assignee, status, folder, due_date or comments.
        field: String,
        /// New value; an empty assignee unassigns.
        value: String,
    },

    /// Delete a batch.
    Delete {
        id: String,
        /// Skip confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },

    /// Delete every batch matching the filter.
    #[command(name = "delete-by-filter")]
    DeleteByFilter {
        /// Substring of the batch id.
        #[arg(long = "id-pattern", default_value = "")]
        id_pattern: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "")]
        assignee: String,
        #[arg(long = "unassigned-only")]
        unassigned_only: bool,
        /// Confirmation phrase; prompted for when omitted.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Delete every batch; the server then reloads its seed data.
    #[command(name = "delete-all")]
    DeleteAll {
        /// Confirmation phrase; prompted for when omitted.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Upload a JSON file with a `batches` array.
    Upload {
        file: PathBuf,
        /// merge or replace.
        #[arg(long, default_value = "merge")]
        mode: String,
        /// Confirmation phrase for replace; prompted for when omitted.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Download all batches as JSON.
    Export {
        /// Destination (default: the server's filename).
        #[arg(long = "out", short = 'o')]
        out: Option<PathBuf>,
    },

    /// Team roster.
    Team {
        #[command(subcommand)]
        action: TeamAction,
    },

    /// Server-side maintenance.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Client configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version.
    Version,
}

#[derive(Subcommand, Debug)]
enum TeamAction {
    /// List members with batch counts.
    List,
    /// Add a member.
    Add {
        name: String,
        #[arg(long, default_value = "Segmentador")]
        role: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Remove a member.
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    /// List mask files stored on the server.
    #[command(name = "check-files")]
    CheckFiles,
    /// Refresh each batch's uploaded-files state.
    #[command(name = "sync-files")]
    SyncFiles,
    /// Create batches for mask files that have none.
    #[command(name = "auto-create")]
    AutoCreate,
    /// Load the server's seed file into an empty database.
    Init,
    /// Expected batch ids not in the database yet.
    Missing,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Update and save configuration values.
    Set {
        #[arg(long)]
        server: Option<String>,
        #[arg(long = "per-page")]
        per_page: Option<u32>,
        /// Operation timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        // Desk errors were already shown by the console sink.
        if e.downcast_ref::<DeskError>().is_none() {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(DeskConfig::default_path);
    let json_output = cli.output == "json";

    let mut config = DeskConfig::load(&config_path)?;
    if let Some(server) = cli.server {
        config.server = server;
    }

    match cli.command {
        Commands::List { page, per_page, assignee } => {
            let per_page = per_page.unwrap_or(config.per_page);
            commands::batches::list(&config, page, per_page, assignee.as_deref(), json_output).await?;
        }

        Commands::Stats => {
            commands::batches::stats(&config, json_output).await?;
        }

        Commands::Create { id, assignee, status, folder, due_date, comments } => {
            let new = commands::batches::new_batch(id, assignee, status, folder, due_date, comments)?;
            commands::batches::create(&config, new, json_output).await?;
        }

        Commands::Set { id, field, value } => {
            commands::batches::set(&config, &id, &field, &value).await?;
        }

        Commands::Delete { id, yes } => {
            if !yes && !commands::ask_yes_no(&format!("Delete batch {}?", id))? {
                println!("Cancelled.");
                return Ok(());
            }
            commands::batches::delete(&config, &id).await?;
        }

        Commands::DeleteByFilter { id_pattern, status, assignee, unassigned_only, confirm } => {
            let filter = commands::batches::delete_filter(id_pattern, status, assignee, unassigned_only)?;
            commands::batches::delete_by_filter(&config, filter, confirm).await?;
        }

        Commands::DeleteAll { confirm } => {
            commands::batches::delete_all(&config, confirm).await?;
        }

        Commands::Upload { file, mode, confirm } => {
            commands::batches::upload(&config, &file, &mode, confirm).await?;
        }

        Commands::Export { out } => {
            commands::batches::export(&config, out.as_deref()).await?;
        }

        Commands::Team { action } => match action {
            TeamAction::List => commands::team::list(&config, json_output).await?,
            TeamAction::Add { name, role, email } => {
                commands::team::add(&config, &name, &role, &email).await?
            }
            TeamAction::Remove { name } => commands::team::remove(&config, &name).await?,
        },

        Commands::Admin { action } => match action {
            AdminAction::CheckFiles => commands::admin::check_files(&config, json_output).await?,
            AdminAction::SyncFiles => commands::admin::sync_files(&config, json_output).await?,
            AdminAction::AutoCreate => commands::admin::auto_create(&config, json_output).await?,
            AdminAction::Init => commands::admin::init(&config, json_output).await?,
            AdminAction::Missing => commands::admin::missing(&config, json_output).await?,
        },

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Set { server, per_page, timeout } => {
                // Re-read so a --server override is only saved when asked for here.
                let mut saved = DeskConfig::load(&config_path)?;
                if let Some(s) = server {
                    saved.server = s;
                }
                if let Some(n) = per_page {
                    saved.per_page = n;
                }
                if let Some(t) = timeout {
                    saved.op_timeout_secs = t;
                }
                saved.save(&config_path)?;
                println!("Config saved to {}.", config_path.display());
            }
        },

        Commands::Version => {
            println!("batchdesk cli v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
