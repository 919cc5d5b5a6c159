//! Integration tests for the console transport and wire protocol.
//!
//! These run against a real in-process WebSocket server standing in for
//! the game console, so correlation, timeouts, and reconnect behavior are
//! exercised over an actual socket.

use engine::config::{EngineTuning, ServerConfig};
use engine::error::TransportError;
use engine::transport::{ConnectionState, RconSession, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use protocol::{CommandFrame, ResponseFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// How the fake console answers one command.
enum FakeReply {
    Text(String),
    /// Swallow the command, never answer.
    Silent,
    /// Drop the whole connection.
    Drop,
}

struct FakeConsole {
    addr: SocketAddr,
    commands: mpsc::UnboundedReceiver<String>,
    lines: mpsc::UnboundedSender<String>,
}

/// Accept-loop fake game console: records every command it sees, answers
/// via the provided closure, and injects console lines on request. Keeps
/// accepting new connections so reconnects work.
async fn spawn_fake_console<F>(respond: F) -> FakeConsole
where
    F: Fn(&str) -> FakeReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    let line_rx = Arc::new(Mutex::new(line_rx));
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(socket) = accept_async(stream).await else {
                continue;
            };
            let (mut sink, mut source) = socket.split();
            let mut line_rx = line_rx.lock().await;
            loop {
                tokio::select! {
                    frame = source.next() => {
                        let raw = match frame {
                            Some(Ok(Message::Text(raw))) => raw,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(_)) => break,
                        };
                        let frame: CommandFrame = serde_json::from_str(&raw).unwrap();
                        let _ = cmd_tx.send(frame.message.clone());
                        match respond(&frame.message) {
                            FakeReply::Text(message) => {
                                let response = ResponseFrame {
                                    identifier: frame.identifier,
                                    message,
                                    kind: "Generic".to_string(),
                                };
                                let _ = sink
                                    .send(Message::Text(
                                        serde_json::to_string(&response).unwrap(),
                                    ))
                                    .await;
                            }
                            FakeReply::Silent => {}
                            FakeReply::Drop => break,
                        }
                    }
                    line = line_rx.recv() => {
                        let Some(line) = line else { break };
                        let event = ResponseFrame {
                            identifier: 0,
                            message: line,
                            kind: "Generic".to_string(),
                        };
                        let _ = sink
                            .send(Message::Text(serde_json::to_string(&event).unwrap()))
                            .await;
                    }
                }
            }
        }
    });

    FakeConsole {
        addr,
        commands: cmd_rx,
        lines: line_tx,
    }
}

fn server_config(addr: SocketAddr) -> ServerConfig {
    ServerConfig {
        id: "test".to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        password: "testpass".to_string(),
    }
}

fn fast_tuning() -> EngineTuning {
    EngineTuning {
        command_timeout_ms: 500,
        roster_poll_secs: 3_600,
        reconcile_secs: 3_600,
        expire_sweep_secs: 3_600,
        reconnect_min_ms: 50,
        reconnect_max_ms: 200,
        ..EngineTuning::default()
    }
}

async fn wait_for_connected(events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    timeout(Duration::from_secs(3), async {
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::Connected) {
                return;
            }
        }
        panic!("event channel closed before connect");
    })
    .await
    .expect("session never connected");
}

/// TRANSPORT TESTS
mod transport_tests {
    use super::*;

    #[tokio::test]
    async fn commands_correlate_to_their_responses() {
        let fake = spawn_fake_console(|cmd| FakeReply::Text(format!("echo:{}", cmd))).await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = RconSession::spawn(server_config(fake.addr), &fast_tuning(), event_tx);
        wait_for_connected(&mut events).await;

        let (first, second) = tokio::join!(
            session.send_command("zone.list"),
            session.send_command("playerlist"),
        );

        assert_eq!(first.unwrap(), "echo:zone.list");
        assert_eq!(second.unwrap(), "echo:playerlist");
        assert_eq!(session.state(), ConnectionState::Connected);
        session.close().await;
    }

    #[tokio::test]
    async fn timeout_is_unknown_outcome_with_no_retry() {
        let fake = spawn_fake_console(|cmd| {
            if cmd == "slow" {
                FakeReply::Silent
            } else {
                FakeReply::Text("ok".to_string())
            }
        })
        .await;
        let mut commands = fake.commands;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = RconSession::spawn(server_config(fake.addr), &fast_tuning(), event_tx);
        wait_for_connected(&mut events).await;

        let result = session.send_command("slow").await;
        assert!(matches!(result, Err(TransportError::CommandTimeout(_))));

        // the session did not retry on its own
        assert_eq!(commands.recv().await.unwrap(), "slow");
        assert!(commands.try_recv().is_err());

        // and it is still usable afterwards
        assert_eq!(session.send_command("ping").await.unwrap(), "ok");
        session.close().await;
    }

    #[tokio::test]
    async fn unsolicited_lines_reach_the_event_channel() {
        let fake = spawn_fake_console(|_| FakeReply::Text("ok".to_string())).await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = RconSession::spawn(server_config(fake.addr), &fast_tuning(), event_tx);
        wait_for_connected(&mut events).await;

        fake.lines
            .send("Alice joined [windows/76561198000000001]".to_string())
            .unwrap();

        let line = timeout(Duration::from_secs(3), async {
            loop {
                match events.recv().await {
                    Some(SessionEvent::Console { line }) => return line,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("console line never arrived");
        assert_eq!(line, "Alice joined [windows/76561198000000001]");
        session.close().await;
    }

    #[tokio::test]
    async fn connection_loss_fails_pending_and_reconnects() {
        let fake = spawn_fake_console(|cmd| {
            if cmd == "die" {
                FakeReply::Drop
            } else {
                FakeReply::Text("ok".to_string())
            }
        })
        .await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = RconSession::spawn(server_config(fake.addr), &fast_tuning(), event_tx);
        wait_for_connected(&mut events).await;

        let result = session.send_command("die").await;
        assert_eq!(result, Err(TransportError::ConnectionLost));

        // backoff brings the session back to the same endpoint
        wait_for_connected(&mut events).await;
        assert_eq!(session.send_command("ping").await.unwrap(), "ok");
        session.close().await;
    }

    #[tokio::test]
    async fn close_cancels_pending_commands() {
        let fake = spawn_fake_console(|_| FakeReply::Silent).await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = Arc::new(RconSession::spawn(
            server_config(fake.addr),
            &fast_tuning(),
            event_tx,
        ));
        wait_for_connected(&mut events).await;

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_command("hang").await })
        };
        sleep(Duration::from_millis(100)).await;
        session.close().await;

        let result = pending.await.unwrap();
        assert_eq!(result, Err(TransportError::Cancelled));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_over_a_real_socket() {
        let fake = spawn_fake_console(|cmd| {
            FakeReply::Text(format!("handled \"{}\" ünïcode ✓", cmd))
        })
        .await;
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let session = RconSession::spawn(server_config(fake.addr), &fast_tuning(), event_tx);
        wait_for_connected(&mut events).await;

        let response = session
            .send_command("zone.edit \"zorp_1\" color \"#00FF00\"")
            .await
            .unwrap();
        assert_eq!(
            response,
            "handled \"zone.edit \"zorp_1\" color \"#00FF00\"\" ünïcode ✓"
        );
        session.close().await;
    }

    #[test]
    fn command_frame_shape_matches_console_contract() {
        let frame = CommandFrame::new(7, "playerlist");
        let raw = serde_json::to_string(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["Identifier"], 7);
        assert_eq!(value["Message"], "playerlist");
        assert!(value["Name"].is_string());
    }
}
