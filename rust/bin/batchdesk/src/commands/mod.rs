pub mod admin;
pub mod batches;
pub mod team;

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use batchdesk::{Desk, DeskConfig, CONFIRM_PHRASE};

use crate::console::ConsoleSink;

/// Build a desk for one command run.
pub fn connect(config: &DeskConfig) -> Desk {
    tracing::debug!(server = %config.server, "connecting");
    Desk::from_config(config, Arc::new(ConsoleSink))
}

/// Same, with the first page already loaded into the cache.
pub async fn connect_loaded(config: &DeskConfig) -> Result<Desk> {
    let desk = connect(config);
    desk.sync(desk.first_page()).await?;
    Ok(desk)
}

fn prompt(message: &str) -> Result<String> {
    eprint!("{}", message);
    std::io::stderr().flush()?;
    let mut s = String::new();
    std::io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn ask_yes_no(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{} [y/N]: ", question))?;
    Ok(answer.eq_ignore_ascii_case("y"))
}

/// The typed confirmation: the flag value, or asked for interactively.
pub fn confirmation(flag: Option<String>, what: &str) -> Result<String> {
    match flag {
        Some(text) => Ok(text),
        None => prompt(&format!("{} cannot be undone. Type {} to proceed: ", what, CONFIRM_PHRASE)),
    }
}
