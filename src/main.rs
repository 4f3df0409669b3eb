//! Textpad - local note pad with debounced autosave
//!
//! Reads lines from stdin: plain lines are appended to the draft and saved
//! after a pause, lines starting with `:` are commands (`:new`, `:open <id>`,
//! `:rm <id>`, `:save`, `:set <text>`, `:ls`, `:show`, `:quit`).

mod app;
mod core;

use anyhow::Result;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::TextpadApp;
use crate::core::config::AppConfig;
use crate::core::storage::{FileStorage, MemoryStorage, Storage};
use crate::core::store::DocumentStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let loaded = AppConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(config.level_filter())
        .init();

    tracing::info!("Starting Textpad...");

    match &loaded {
        Err(e) => tracing::warn!("Using default config: {:#}", e),
        Ok(_) => {
            let missing = AppConfig::config_path().is_some_and(|path| !path.exists());
            if missing {
                if let Err(e) = config.save() {
                    tracing::warn!("Failed to write default config: {:#}", e);
                }
            }
        }
    }

    let store = DocumentStore::new(open_storage(&config))
        .with_autosave_delay(config.editor.autosave_delay());
    let mut app = TextpadApp::new(store);

    let stdin = BufReader::new(tokio::io::stdin());
    app::run(&mut app, stdin, &mut std::io::stdout()).await?;

    tracing::info!("Bye");
    Ok(())
}

/// Pick the storage backend the config asks for
fn open_storage(config: &AppConfig) -> Option<Box<dyn Storage>> {
    if !config.persist {
        tracing::info!("Persistence disabled, documents are kept in memory");
        return Some(Box::new(MemoryStorage::new()));
    }

    match config.storage_dir() {
        Some(dir) => {
            tracing::info!("Storing documents in: {}", dir.display());
            Some(Box::new(FileStorage::new(dir)))
        }
        None => {
            tracing::warn!("No data directory available, documents will not be persisted");
            None
        }
    }
}
