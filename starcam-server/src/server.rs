//! TCP acceptor: one session task per connected client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::frame::LatestFrame;
use crate::session::{Session, SessionConfig};
use crate::store::ConfigStore;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    store: Arc<ConfigStore>,
    latest: LatestFrame,
    config: SessionConfig,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal for the server.
    pub async fn bind(
        addr: &str,
        store: Arc<ConfigStore>,
        latest: LatestFrame,
        config: SessionConfig,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            store,
            latest,
            config,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `cancel` fires, then wait for every session to
    /// wind down.
    pub async fn run(self, cancel: CancellationToken) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("{}: could not disable Nagle: {}", peer, e);
                        }
                        let session = Session::new(
                            stream,
                            peer,
                            self.store.clone(),
                            self.latest.clone(),
                            self.config,
                        );
                        sessions.spawn(session.run(cancel.clone()));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!("Acceptor stopping, waiting for {} sessions", sessions.len());
        while sessions.join_next().await.is_some() {}
    }
}
