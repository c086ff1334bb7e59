//! Add command implementation.

use super::Session;
use lockbox_client::SaveOutcome;
use lockbox_crypto::Profile;
use lockbox_protocol::BlockKind;
use std::path::PathBuf;

/// Where the plaintext comes from.
#[derive(Debug)]
pub enum Payload {
    /// Given on the command line.
    Text(String),
    /// Contents of a file.
    File(PathBuf),
}

/// Encrypts a payload and saves it as a new block.
pub async fn run(
    session: &Session,
    title: &str,
    kind: &str,
    password: &str,
    profile: Option<&str>,
    payload: Payload,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = BlockKind::from_name(kind).ok_or_else(|| format!("unknown block type: {}", kind))?;
    let profile = profile.map(str::parse::<Profile>).transpose()?;

    let plaintext = match payload {
        Payload::Text(text) => text.into_bytes(),
        Payload::File(path) => {
            let size = std::fs::metadata(&path)?.len();
            if size > BlockKind::MAX_FILE_SIZE as u64 {
                return Err(format!(
                    "{} is {} bytes; the limit is {}",
                    path.display(),
                    size,
                    BlockKind::MAX_FILE_SIZE
                )
                .into());
            }
            std::fs::read(&path)?
        }
    };

    let engine = session.connect().await?;
    let outcome = engine
        .seal_and_save(title, kind.type_id(), plaintext, password.as_bytes(), profile)
        .await;
    engine.shutdown().await?;

    match outcome? {
        SaveOutcome::Synced(id) => println!("Saved block {} ({})", id, title),
        SaveOutcome::Queued => println!("Saved '{}' locally; it will sync when online", title),
    }
    Ok(())
}
