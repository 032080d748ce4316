//! Per-client command/telemetry session
//!
//! Every cycle a session waits up to the receive timeout for one command,
//! applies it if one arrived, then sends a telemetry snapshot followed by
//! the current frame. A client that never sends anything still gets a
//! telemetry message every timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use starcam_proto::{Command, Telemetry};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::frame::LatestFrame;
use crate::store::ConfigStore;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long to wait for a command each cycle
    pub recv_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_millis(2500),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Sending telemetry or the frame failed
    SendFailed(std::io::Error),
    /// Server shutdown
    Cancelled,
}

pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    store: Arc<ConfigStore>,
    latest: LatestFrame,
    config: SessionConfig,
    /// Bytes of a command that has not fully arrived yet
    pending: BytesMut,
    /// The client will not send anything more
    peer_closed: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        store: Arc<ConfigStore>,
        latest: LatestFrame,
        config: SessionConfig,
    ) -> Self {
        Self {
            stream,
            peer,
            store,
            latest,
            config,
            pending: BytesMut::with_capacity(Command::SIZE * 2),
            peer_closed: false,
        }
    }

    /// Serve the client until a send fails or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionEnd {
        info!("Session started for {}", self.peer);
        let end = loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                received = self.receive() => received,
            };

            if let Some(cmd) = received {
                self.apply(cmd).await;
            }

            let telemetry = self.store.snapshot();
            let frame = self.latest.current();
            let sent = tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                sent = self.send(&telemetry, &frame) => sent,
            };
            if let Err(e) = sent {
                break SessionEnd::SendFailed(e);
            }
        };

        match &end {
            SessionEnd::SendFailed(e) => info!("Session for {} ended: {}", self.peer, e),
            SessionEnd::Cancelled => info!("Session for {} closed for shutdown", self.peer),
        }
        end
    }

    /// Wait up to the receive timeout for one complete command.
    ///
    /// Timeouts, partial commands, garbled commands and read errors all mean
    /// "no command this cycle". Partial bytes are kept for the next cycle.
    async fn receive(&mut self) -> Option<Command> {
        if self.peer_closed {
            tokio::time::sleep(self.config.recv_timeout).await;
            return None;
        }

        let deadline = Instant::now() + self.config.recv_timeout;
        while self.pending.len() < Command::SIZE {
            match timeout_at(deadline, self.stream.read_buf(&mut self.pending)).await {
                Err(_) => {
                    if !self.pending.is_empty() {
                        trace!(
                            "{}: {} of {} command bytes so far",
                            self.peer,
                            self.pending.len(),
                            Command::SIZE
                        );
                    }
                    return None;
                }
                Ok(Ok(0)) => {
                    debug!("{} stopped sending", self.peer);
                    self.peer_closed = true;
                    return None;
                }
                Ok(Ok(n)) => trace!("{}: read {} bytes", self.peer, n),
                Ok(Err(e)) => {
                    debug!("{}: receive error: {}", self.peer, e);
                    self.peer_closed = true;
                    return None;
                }
            }
        }

        let bytes = self.pending.split_to(Command::SIZE);
        match Command::from_bytes(&bytes) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                debug!("{}: discarding command: {}", self.peer, e);
                None
            }
        }
    }

    async fn apply(&mut self, cmd: Command) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.apply_command(&cmd)).await {
            Ok(outcome) if outcome.hardware_fault => {
                warn!("{}: command applied, hardware reported a fault", self.peer)
            }
            Ok(outcome) => debug!("{}: applied {:?}", self.peer, outcome.request),
            Err(e) => warn!("{}: command application panicked: {}", self.peer, e),
        }
    }

    async fn send(&mut self, telemetry: &Telemetry, frame: &Bytes) -> std::io::Result<()> {
        self.stream.write_all(telemetry.as_bytes()).await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        trace!(
            "{}: sent {} + {} bytes",
            self.peer,
            Telemetry::SIZE,
            frame.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::simulated::SimulatedPayload;
    use hardware::AppliedSettings;
    use tokio::io::DuplexStream;

    const W: usize = 8;
    const H: usize = 4;
    const TIMEOUT: Duration = Duration::from_millis(100);

    fn store() -> Arc<ConfigStore> {
        let payload = SimulatedPayload::new(AppliedSettings::new(800.0, 0));
        Arc::new(ConfigStore::with_defaults(Box::new(payload)))
    }

    fn start(
        store: Arc<ConfigStore>,
    ) -> (
        DuplexStream,
        CancellationToken,
        tokio::task::JoinHandle<SessionEnd>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let session = Session::new(
            server,
            "127.0.0.1:9".parse().unwrap(),
            store,
            LatestFrame::new(W, H),
            SessionConfig {
                recv_timeout: TIMEOUT,
            },
        );
        let handle = tokio::spawn(session.run(cancel.clone()));
        (client, cancel, handle)
    }

    async fn read_telemetry(client: &mut DuplexStream) -> Telemetry {
        let mut buf = vec![0u8; Telemetry::SIZE + W * H];
        client.read_exact(&mut buf).await.unwrap();
        Telemetry::from_bytes(&buf[..Telemetry::SIZE]).unwrap()
    }

    #[tokio::test]
    async fn test_telemetry_without_command() {
        let (mut client, cancel, handle) = start(store());
        let telemetry = read_telemetry(&mut client).await;
        let camera = telemetry.camera;
        assert_eq!(camera.exposure_time, 800.0);
        cancel.cancel();
        assert!(matches!(handle.await.unwrap(), SessionEnd::Cancelled));
    }

    #[tokio::test]
    async fn test_partial_command_completes_next_cycle() {
        let store = store();
        let (mut client, cancel, _handle) = start(store.clone());

        let mut cmd = Command::hold(&store.snapshot());
        cmd.odds_threshold = 1e9;
        let bytes = cmd.as_bytes().to_vec();

        client.write_all(&bytes[..50]).await.unwrap();
        let first = read_telemetry(&mut client).await;
        let astrometry = first.astrometry;
        assert_eq!(astrometry.odds_threshold, 1e8);

        client.write_all(&bytes[50..]).await.unwrap();
        // A telemetry may already be in flight from before the rest arrived.
        let mut odds = 0.0;
        for _ in 0..3 {
            let astrometry = read_telemetry(&mut client).await.astrometry;
            odds = astrometry.odds_threshold;
            if odds == 1e9 {
                break;
            }
        }
        assert_eq!(odds, 1e9);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_garbled_command_is_discarded() {
        let store = store();
        let (mut client, cancel, _handle) = start(store.clone());

        let mut cmd = Command::hold(&store.snapshot());
        cmd.latitude = f64::NAN;
        client.write_all(cmd.as_bytes()).await.unwrap();

        let mut good = Command::hold(&store.snapshot());
        good.latitude = 12.5;
        client.write_all(good.as_bytes()).await.unwrap();

        let mut latitude = 0.0;
        for _ in 0..4 {
            latitude = read_telemetry(&mut client).await.astrometry.latitude;
            if latitude == 12.5 {
                break;
            }
            assert!(!latitude.is_nan());
        }
        assert_eq!(latitude, 12.5);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_closed_peer_is_paced_by_timeout() {
        let (mut client, cancel, _handle) = start(store());
        client.shutdown().await.unwrap();

        read_telemetry(&mut client).await;
        let started = std::time::Instant::now();
        read_telemetry(&mut client).await;
        read_telemetry(&mut client).await;
        assert!(started.elapsed() >= TIMEOUT);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_send_failure_ends_session() {
        let (client, _cancel, handle) = start(store());
        drop(client);
        let end = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(end, SessionEnd::SendFailed(_)));
    }
}
