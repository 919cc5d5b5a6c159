//! One persistent web-console session per game server.
//!
//! Commands are correlated to responses by a locally unique identifier
//! held in a pending map of oneshot waiters. Unsolicited frames (the
//! console event stream) are forwarded to the owning supervisor. A driver
//! task keeps the socket alive, reconnecting with capped exponential
//! backoff; on any close every in-flight command fails with
//! `ConnectionLost` so callers can defer repair to reconciliation.

use crate::config::{EngineTuning, ServerConfig};
use crate::error::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use protocol::{CommandFrame, ResponseFrame};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type Waiter = oneshot::Sender<Result<String, TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

/// What the session forwards to its owning supervisor.
#[derive(Debug)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// Uncorrelated console output.
    Console { line: String },
}

struct Shared {
    pending: Mutex<HashMap<i64, Waiter>>,
    sink: Mutex<Option<WsSink>>,
    state: AtomicU8,
    next_id: AtomicI64,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
            state: AtomicU8::new(STATE_DISCONNECTED),
            next_id: AtomicI64::new(1),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => STATE_DISCONNECTED,
            ConnectionState::Connecting => STATE_CONNECTING,
            ConnectionState::Connected => STATE_CONNECTED,
        };
        self.state.store(raw, Ordering::Release);
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTED => ConnectionState::Connected,
            STATE_CONNECTING => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

pub struct RconSession {
    server_id: String,
    shared: Arc<Shared>,
    command_timeout: Duration,
    driver: JoinHandle<()>,
}

impl RconSession {
    /// Starts the connection driver and returns the session handle. The
    /// driver reconnects forever until `close` is called.
    pub fn spawn(
        config: ServerConfig,
        tuning: &EngineTuning,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let server_id = config.id.clone();
        let backoff_min = Duration::from_millis(tuning.reconnect_min_ms);
        let backoff_max = Duration::from_millis(tuning.reconnect_max_ms);
        let driver = tokio::spawn(run_driver(
            config,
            backoff_min,
            backoff_max,
            Arc::clone(&shared),
            event_tx,
        ));
        Self {
            server_id,
            shared,
            command_timeout: Duration::from_millis(tuning.command_timeout_ms),
            driver,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Sends one command and awaits the correlated response.
    ///
    /// `CommandTimeout` means the outcome is unknown: the command may have
    /// executed. Callers must not blind-retry mutations; divergence is the
    /// reconciliation sweeper's job.
    pub async fn send_command(&self, text: &str) -> Result<String, TransportError> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        let frame = CommandFrame::new(id, text);
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                self.shared.pending.lock().await.remove(&id);
                return Err(TransportError::Codec(e.to_string()));
            }
        };

        {
            let mut sink = self.shared.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => {
                    if sink.send(Message::Text(payload)).await.is_err() {
                        self.shared.pending.lock().await.remove(&id);
                        return Err(TransportError::ConnectionLost);
                    }
                }
                None => {
                    self.shared.pending.lock().await.remove(&id);
                    return Err(TransportError::NotConnected);
                }
            }
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            // waiter dropped without a verdict: the read loop died
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                warn!(
                    "[{}] command unanswered after {:?}, outcome unknown",
                    self.server_id, self.command_timeout
                );
                Err(TransportError::CommandTimeout(self.command_timeout))
            }
        }
    }

    /// Tears the session down: no reconnect, pending commands fail with
    /// `Cancelled`, the socket closes.
    pub async fn close(&self) {
        self.driver.abort();
        self.shared.set_state(ConnectionState::Disconnected);
        fail_pending(&self.shared, TransportError::Cancelled).await;
        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        info!("[{}] session closed", self.server_id);
    }
}

async fn run_driver(
    config: ServerConfig,
    backoff_min: Duration,
    backoff_max: Duration,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut backoff = backoff_min;
    loop {
        shared.set_state(ConnectionState::Connecting);
        match connect_async(config.endpoint()).await {
            Ok((socket, _)) => {
                info!("[{}] console connected", config.id);
                let (sink, source) = socket.split();
                *shared.sink.lock().await = Some(sink);
                shared.set_state(ConnectionState::Connected);
                backoff = backoff_min;
                if event_tx.send(SessionEvent::Connected).is_err() {
                    return;
                }

                pump(&config.id, source, &shared, &event_tx).await;

                shared.set_state(ConnectionState::Disconnected);
                *shared.sink.lock().await = None;
                fail_pending(&shared, TransportError::ConnectionLost).await;
                warn!("[{}] console disconnected", config.id);
                if event_tx.send(SessionEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                shared.set_state(ConnectionState::Disconnected);
                debug!("[{}] connect failed: {}", config.id, e);
            }
        }

        tokio::time::sleep(jitter(backoff)).await;
        backoff = next_backoff(backoff, backoff_max);
    }
}

/// Reads frames until the socket closes.
async fn pump(
    server_id: &str,
    mut source: WsSource,
    shared: &Shared,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(item) = source.next().await {
        match item {
            Ok(Message::Text(raw)) => handle_frame(server_id, &raw, shared, event_tx).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[{}] read error: {}", server_id, e);
                break;
            }
        }
    }
}

async fn handle_frame(
    server_id: &str,
    raw: &str,
    shared: &Shared,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    let frame: ResponseFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        // Some servers emit bare text between frames; treat it as console
        // output rather than dropping it.
        Err(_) => {
            let _ = event_tx.send(SessionEvent::Console {
                line: raw.to_string(),
            });
            return;
        }
    };

    if frame.is_event() {
        let _ = event_tx.send(SessionEvent::Console {
            line: frame.message,
        });
        return;
    }

    match shared.pending.lock().await.remove(&frame.identifier) {
        Some(waiter) => {
            let _ = waiter.send(Ok(frame.message));
        }
        None => {
            // Late answer to a command that already timed out.
            debug!(
                "[{}] response for unknown identifier {}",
                server_id, frame.identifier
            );
        }
    }
}

async fn fail_pending(shared: &Shared, error: TransportError) {
    let mut pending = shared.pending.lock().await;
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(error.clone()));
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// ±50% so a fleet of supervisors doesn't reconnect in lockstep.
fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn test_config() -> ServerConfig {
        ServerConfig {
            id: "main".to_string(),
            // reserved port, nothing listens here
            host: "127.0.0.1".to_string(),
            port: 1,
            password: "secret".to_string(),
        }
    }

    #[test]
    fn backoff_doubles_to_cap() {
        let max = Duration::from_secs(60);
        let mut backoff = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff);
            backoff = next_backoff(backoff, max);
        }
        assert_eq!(seen[0], Duration::from_secs(1));
        assert_eq!(seen[1], Duration::from_secs(2));
        assert_eq!(seen[5], Duration::from_secs(32));
        assert_eq!(seen[6], Duration::from_secs(60));
        assert_eq!(seen[7], Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_bounded() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = jitter(base);
            assert!(jittered >= Duration::from_secs(5));
            assert!(jittered <= Duration::from_secs(15));
        }
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected_fast() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let session = RconSession::spawn(test_config(), &EngineTuning::default(), event_tx);

        let result = session.send_command("zone.list").await;
        assert_eq!(result, Err(TransportError::NotConnected));
        session.close().await;
    }

    #[tokio::test]
    async fn response_resolves_matching_waiter() {
        let shared = Shared::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(7, tx);

        let raw = r#"{"Identifier":7,"Message":"ok","Type":"Generic"}"#;
        handle_frame("main", raw, &shared, &event_tx).await;

        let verdict = assert_ok!(rx.await);
        assert_eq!(verdict, Ok("ok".to_string()));
        assert!(shared.pending.lock().await.is_empty());
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_frame_is_forwarded_not_correlated() {
        let shared = Shared::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let raw = r#"{"Identifier":0,"Message":"Alice joined [windows/1]","Type":"Generic"}"#;
        handle_frame("main", raw, &shared, &event_tx).await;

        match event_rx.try_recv() {
            Ok(SessionEvent::Console { line }) => {
                assert_eq!(line, "Alice joined [windows/1]");
            }
            other => panic!("expected console event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bare_text_counts_as_console_output() {
        let shared = Shared::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        handle_frame("main", "Saving complete", &shared, &event_tx).await;

        assert!(matches!(
            event_rx.try_recv(),
            Ok(SessionEvent::Console { .. })
        ));
    }

    #[tokio::test]
    async fn late_response_is_dropped() {
        let shared = Shared::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        // Nothing pending under identifier 9.
        let raw = r#"{"Identifier":9,"Message":"late","Type":"Generic"}"#;
        handle_frame("main", raw, &shared, &event_tx).await;
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fail_pending_fails_everything_at_once() {
        let shared = Shared::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        {
            let mut pending = shared.pending.lock().await;
            pending.insert(1, tx1);
            pending.insert(2, tx2);
        }

        fail_pending(&shared, TransportError::ConnectionLost).await;

        assert_eq!(rx1.await.unwrap(), Err(TransportError::ConnectionLost));
        assert_eq!(rx2.await.unwrap(), Err(TransportError::ConnectionLost));
        assert!(shared.pending.lock().await.is_empty());
    }
}
