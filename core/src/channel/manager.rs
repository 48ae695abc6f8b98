/// Process-wide owner of the shared broadcast connection
use crate::channel::authorizer::ChannelAuthorizer;
use crate::channel::connection::ChannelConnection;
use crate::channel::transport::Transport;
use crate::config::Config;
use crate::error::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

static SHARED: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

/// Install the process-wide manager; the first install wins and is returned
pub fn install_shared(manager: Arc<ConnectionManager>) -> Arc<ConnectionManager> {
    SHARED.get_or_init(|| manager).clone()
}

/// Lazily creates one connection and hands the same instance to every caller.
///
/// Construction runs under the slot lock, so concurrent first callers wait for
/// the single in-flight connect instead of racing their own.
pub struct ConnectionManager {
    config: Config,
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn ChannelAuthorizer>,
    slot: Mutex<Option<Arc<ChannelConnection>>>,
    connects: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        Self {
            config,
            transport,
            authorizer,
            slot: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    /// The shared connection, opened on first use.
    ///
    /// A connection the server dropped is replaced; one closed through
    /// `disconnect` is simply gone until the next call.
    pub async fn get_connection(&self) -> Result<Arc<ChannelConnection>> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_connected() {
                return Ok(connection.clone());
            }
            info!("Shared connection was lost, reconnecting");
        }

        let connection =
            ChannelConnection::connect(&self.config, self.transport.as_ref(), self.authorizer.clone())
                .await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Close the shared connection and clear it; idempotent
    pub async fn disconnect(&self) {
        let connection = self.slot.lock().await.take();
        match connection {
            Some(connection) => {
                connection.close().await;
                info!("Shared connection disconnected");
            }
            None => debug!("Disconnect requested with no connection open"),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Number of connections opened over this manager's lifetime
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
