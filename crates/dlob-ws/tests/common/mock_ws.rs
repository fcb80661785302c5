#![allow(dead_code)]

//! Mock DLOB WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and count them
//! - Record received text frames
//! - Push text or binary frames to every connected client
//! - Drop every connection without a close handshake

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Binary(Vec<u8>),
    Drop,
}

#[derive(Debug, Default)]
struct Counters {
    connections: u32,
    closed: u32,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    messages: Arc<Mutex<Vec<String>>>,
    counters: Arc<Mutex<Counters>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let counters: Arc<Mutex<Counters>> = Arc::new(Mutex::new(Counters::default()));
        let (commands, _) = broadcast::channel::<Command>(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let counters_clone = counters.clone();
        let commands_clone = commands.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        // Subscribe before the handshake so no push is missed.
                        let commands = commands_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            counters_clone.clone(),
                            commands,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            messages,
            counters,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of accepted connections so far.
    pub async fn connection_count(&self) -> u32 {
        self.counters.lock().await.connections
    }

    /// Number of connections that ended from the client side.
    pub async fn closed_count(&self) -> u32 {
        self.counters.lock().await.closed
    }

    /// All received text frames in arrival order.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Received text frames parsed as JSON.
    pub async fn received_json(&self) -> Vec<serde_json::Value> {
        self.received_messages()
            .await
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Text(text.into()));
    }

    pub fn push_binary(&self, bytes: Vec<u8>) {
        let _ = self.commands.send(Command::Binary(bytes));
    }

    pub fn push_heartbeat(&self) {
        self.push_text(r#"{"channel":"heartbeat"}"#);
    }

    /// Drop every open connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Wait until at least `count` frames were received.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let messages = self.received_messages().await;
            if messages.len() >= count || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: u32, timeout: Duration) -> u32 {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let connections = self.connection_count().await;
            if connections >= count || tokio::time::Instant::now() >= deadline {
                return connections;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` connections were closed by the client.
    pub async fn wait_for_closes(&self, count: u32, timeout: Duration) -> u32 {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let closed = self.closed_count().await;
            if closed >= count || tokio::time::Instant::now() >= deadline {
                return closed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    counters: Arc<Mutex<Counters>>,
    mut commands: broadcast::Receiver<Command>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    counters.lock().await.connections += 1;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().await.push(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    counters.lock().await.closed += 1;
                    break;
                }
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Ok(Command::Text(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(Command::Binary(bytes)) => {
                    let _ = write.send(Message::Binary(bytes)).await;
                }
                Ok(Command::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}
