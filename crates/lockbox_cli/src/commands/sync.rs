//! Sync command implementation.

use super::Session;
use lockbox_client::ClientEvent;
use tokio::sync::broadcast::error::RecvError;

/// Keeps the engine running and prints events until Ctrl-C.
pub async fn run(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let engine = session.engine()?;
    if engine.store().state().token.is_none() {
        return Err("not logged in; run `lockbox register` or `lockbox login` first".into());
    }

    let mut events = engine.events();
    engine.start();
    println!("Syncing with {} (Ctrl-C to stop)", engine.config().server_addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Online) => println!("online"),
                Ok(ClientEvent::Offline) => println!("offline"),
                Ok(ClientEvent::Snapshot(blocks)) => println!("snapshot: {} blocks", blocks.len()),
                Ok(ClientEvent::Error(message)) => eprintln!("error: {}", message),
                Err(RecvError::Lagged(missed)) => eprintln!("missed {} events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await?;
    let stats = engine.stats();
    println!(
        "Stopped. {} snapshots received, {} queued blocks synced.",
        stats.snapshots_received, stats.blocks_reconciled
    );
    Ok(())
}
