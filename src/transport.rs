//! Transport listener
//!
//! Accepts TCP connections and runs one WebSocket session per connection.
//! The listener is owned by the node and only started or stopped from the
//! node's own mailbox loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::actor::Address;
use crate::config::Config;
use crate::error::ChatError;
use crate::node::NodeMessage;
use crate::session::handle_connection;

/// A running accept loop and the sessions it spawned
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind the configured address and start accepting in the background
    pub async fn bind(config: Arc<Config>, node: Address<NodeMessage>) -> Result<Self, ChatError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::TransportInit {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ChatError::TransportInit { addr, source })?;

        info!("WebSocket chat transport listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, node, config, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every session and wait up to `grace`
    pub async fn shutdown(self, grace: Duration) -> Result<(), ChatError> {
        let Self {
            shutdown_tx,
            mut task,
            ..
        } = self;
        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {
                info!("Transport stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ChatError::TransportShutdown(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ChatError::TransportShutdown(format!(
                    "sessions still open after {:?}",
                    grace
                )))
            }
        }
    }
}

/// Connection accept loop
async fn accept_loop(
    listener: TcpListener,
    node: Address<NodeMessage>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let node = node.clone();
                    let config = config.clone();
                    let shutdown = shutdown.clone();
                    sessions.spawn(async move {
                        if let Err(e) = handle_connection(stream, node, config, shutdown).await {
                            warn!("Session from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    drop(listener);
    debug!("Waiting for {} session(s) to close", sessions.len());
    while sessions.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::config::Routing;
    use crate::message::{ClientMessage, ErrorCode, ServerMessage};
    use crate::node::{Node, NodeHandle};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn running_node() -> (NodeHandle, SocketAddr) {
        running_node_with(Config::default()).await
    }

    async fn running_node_with(config: Config) -> (NodeHandle, SocketAddr) {
        let node = Node::spawn(Config {
            node_name: Some("ws-node".to_string()),
            host: "127.0.0.1".to_string(),
            port: 0,
            routing: Routing::Broadcast,
            ..config
        });
        node.start().await.unwrap();
        let addr = node.status().await.unwrap().listen_addr.unwrap();
        (node, addr)
    }

    async fn send(client: &mut Client, msg: &ClientMessage) {
        let json = serde_json::to_string(msg).unwrap();
        client.send(Message::Text(json.into())).await.unwrap();
    }

    async fn next(client: &mut Client) -> Option<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .ok()??;
            match frame.ok()? {
                Message::Text(text) => return serde_json::from_str(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    async fn connect(addr: SocketAddr, username: &str) -> (Client, Option<ServerMessage>) {
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        send(
            &mut client,
            &ClientMessage::Join {
                username: username.to_string(),
            },
        )
        .await;
        let reply = next(&mut client).await;
        (client, reply)
    }

    #[tokio::test]
    async fn test_chat_over_websocket() {
        let (node, addr) = running_node().await;

        let (mut alice, welcome) = connect(addr, "alice").await;
        assert_eq!(
            welcome,
            Some(ServerMessage::Welcome {
                username: "alice".to_string(),
                node: "ws-node".to_string(),
            })
        );
        let (mut bob, welcome) = connect(addr, "bob").await;
        assert!(matches!(welcome, Some(ServerMessage::Welcome { .. })));

        send(
            &mut alice,
            &ClientMessage::Say {
                text: "hello".to_string(),
            },
        )
        .await;

        let expected = ServerMessage::Message {
            from: "alice".to_string(),
            to: String::new(),
            body: "hello".to_string(),
        };
        assert_eq!(next(&mut bob).await, Some(expected.clone()));
        assert_eq!(next(&mut alice).await, Some(expected));

        send(&mut bob, &ClientMessage::Who).await;
        assert_eq!(
            next(&mut bob).await,
            Some(ServerMessage::Users {
                usernames: vec!["alice".to_string(), "bob".to_string()],
            })
        );

        node.stop().await.unwrap();
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected_over_websocket() {
        let (node, addr) = running_node().await;

        let (_alice, welcome) = connect(addr, "alice").await;
        assert!(matches!(welcome, Some(ServerMessage::Welcome { .. })));

        let (_imposter, reply) = connect(addr, "alice").await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                code: ErrorCode::DuplicateUser,
                ..
            })
        ));

        node.stop().await.unwrap();
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_frame_before_join_rejected() {
        let (node, addr) = running_node().await;

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        send(&mut client, &ClientMessage::Who).await;
        assert!(matches!(
            next(&mut client).await,
            Some(ServerMessage::Error {
                code: ErrorCode::JoinRequired,
                ..
            })
        ));

        node.stop().await.unwrap();
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_leave_frees_username() {
        let (node, addr) = running_node().await;

        let (mut alice, _) = connect(addr, "alice").await;
        send(&mut alice, &ClientMessage::Leave).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !node.status().await.unwrap().users.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "alice never left");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (_again, welcome) = connect(addr, "alice").await;
        assert!(matches!(welcome, Some(ServerMessage::Welcome { .. })));

        node.stop().await.unwrap();
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_unjoined_connection() {
        let (node, addr) = running_node_with(Config {
            shutdown_grace_ms: 300,
            ..Config::default()
        })
        .await;

        // Handshake done, but no join frame is ever sent
        let (mut idle, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        node.stop().await.unwrap();
        assert_eq!(next(&mut idle).await, None);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_closes_open_sessions() {
        let (node, addr) = running_node().await;
        let (mut alice, _) = connect(addr, "alice").await;

        node.stop().await.unwrap();

        // The server closed the socket; no more chat frames arrive
        assert_eq!(next(&mut alice).await, None);
        node.shutdown().await;
    }
}
