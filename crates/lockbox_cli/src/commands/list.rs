//! List command implementation.

use super::Session;
use lockbox_protocol::{Block, BlockKind};
use serde::Serialize;

/// One row of the listing.
#[derive(Debug, Serialize)]
pub struct BlockRow {
    /// Block ID (0 while queued).
    pub id: u64,
    /// Title.
    pub title: String,
    /// Type name.
    pub kind: String,
    /// Key derivation profile.
    pub profile: String,
    /// Whether the server has the block.
    pub synced: bool,
}

impl BlockRow {
    fn from_block(block: &Block, synced: bool) -> Self {
        let kind = block
            .block_type
            .as_ref()
            .map(|t| t.name.clone())
            .or_else(|| BlockKind::from_type_id(block.type_id).map(|k| k.name().to_string()))
            .unwrap_or_else(|| format!("type {}", block.type_id));
        Self {
            id: block.id,
            title: block.title.clone(),
            kind,
            profile: block.envelope.profile.to_string(),
            synced,
        }
    }
}

/// Lists every block known locally, refreshed from the server when online.
pub async fn run(session: &Session, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = session.connect().await?;
    if let Err(e) = engine.refresh().await {
        eprintln!("Refresh failed: {}", e);
    }

    let store = engine.store();
    let rows: Vec<BlockRow> = store
        .read_synced()
        .iter()
        .map(|b| BlockRow::from_block(b, true))
        .chain(store.read_unsynced().iter().map(|b| BlockRow::from_block(b, false)))
        .collect();
    engine.shutdown().await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No blocks.");
            }
            for row in &rows {
                let marker = if row.synced { " " } else { "*" };
                println!(
                    "{}{:>6}  {:<12} {:<12} {}",
                    marker, row.id, row.kind, row.profile, row.title
                );
            }
            if rows.iter().any(|r| !r.synced) {
                println!("(* = not yet synced)");
            }
        }
    }
    Ok(())
}
