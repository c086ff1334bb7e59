//! CLI command implementations.

pub mod account;
pub mod add;
pub mod list;
pub mod serve;
pub mod show;
pub mod sync;

use lockbox_client::{ClientConfig, ClientSyncEngine, OfflineStore, RpcTransport, TcpChannel};
use std::path::PathBuf;
use std::sync::Arc;

/// Engine type used by every client command.
pub type Engine = ClientSyncEngine<RpcTransport<TcpChannel>>;

/// Where the client talks to and where it keeps its state.
pub struct Session {
    server: String,
    state: PathBuf,
}

impl Session {
    /// Creates a session description.
    pub fn new(server: String, state: PathBuf) -> Self {
        Self { server, state }
    }

    /// Opens the existing local store and builds an engine, without checking connectivity.
    ///
    /// A missing or unreadable state file is an error; only
    /// [`engine_or_init`](Self::engine_or_init) creates one.
    pub fn engine(&self) -> Result<Arc<Engine>, Box<dyn std::error::Error>> {
        let store = OfflineStore::load(&self.state)?;
        Ok(self.build(store))
    }

    /// Like [`engine`](Self::engine), but starts a fresh store when none
    /// exists yet.
    pub fn engine_or_init(&self) -> Result<Arc<Engine>, Box<dyn std::error::Error>> {
        let store = OfflineStore::load_or_create(&self.state)?;
        Ok(self.build(store))
    }

    fn build(&self, store: OfflineStore) -> Arc<Engine> {
        let config = ClientConfig::new(self.server.clone(), self.state.clone());
        let transport = Arc::new(RpcTransport::new(TcpChannel::new(
            config.server_addr.clone(),
            config.connect_timeout,
        )));
        ClientSyncEngine::new(config, transport, Arc::new(store))
    }

    /// Builds an engine and runs one connectivity check, which also flushes
    /// queued writes when the server is reachable.
    pub async fn connect(&self) -> Result<Arc<Engine>, Box<dyn std::error::Error>> {
        let engine = self.engine()?;
        if engine.check_connectivity().await.is_online() {
            tracing::debug!("connected to {}", self.server);
        } else {
            eprintln!("Server unreachable; working from the local copy.");
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_client::ClientError;

    fn session(dir: &tempfile::TempDir, name: &str) -> Session {
        Session::new("127.0.0.1:1".into(), dir.path().join(name))
    }

    #[test]
    fn missing_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir, "lost.json");

        let err = session.engine().err().expect("missing file accepted");
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::Persistence(_))
        ));
        assert!(!dir.path().join("lost.json").exists());
    }

    #[tokio::test]
    async fn account_commands_create_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir, "fresh.json");

        let engine = session.engine_or_init().unwrap();
        engine.shutdown().await.unwrap();
        assert!(dir.path().join("fresh.json").exists());

        let reopened = session.engine().unwrap();
        assert_eq!(
            reopened.store().state().client_id,
            engine.store().state().client_id
        );
    }
}
