//! Show command implementation.

use super::Session;
use lockbox_client::ClientError;
use lockbox_protocol::BlockKind;
use std::io::Write;

/// Decrypts a block and writes its plaintext to stdout.
pub async fn run(session: &Session, id: u64, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = session.engine()?;
    let block = engine
        .list_blocks()
        .into_iter()
        .find(|b| b.id == id)
        .ok_or_else(|| format!("no block with id {}", id))?;

    let plaintext = match engine.open_block(&block, password.as_bytes()).await {
        Ok(plaintext) => plaintext,
        Err(ClientError::WrongCredential) => return Err("wrong password".into()),
        Err(e) => return Err(e.into()),
    };

    if block.type_id == BlockKind::File.type_id() {
        std::io::stdout().write_all(&plaintext)?;
    } else {
        println!("{}", block.title);
        println!("{}", String::from_utf8_lossy(&plaintext));
    }
    Ok(())
}
