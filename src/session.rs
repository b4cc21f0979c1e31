//! WebSocket session handler
//!
//! Handles one client connection: WebSocket handshake, the join/admission
//! exchange with the node, then bidirectional traffic between the socket
//! and the session's user actor.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::actor::Address;
use crate::config::Config;
use crate::error::ChatError;
use crate::message::{ClientMessage, EgressMessage, ErrorCode, IngressMessage, ServerMessage};
use crate::node::NodeMessage;
use crate::program::Program;
use crate::types::SessionId;
use crate::user::UserMessage;

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a new TCP connection
///
/// Runs until the client leaves, the socket fails, or `shutdown` flips.
/// Admission failures are reported to the client and returned; they never
/// affect other sessions.
pub async fn handle_connection(
    stream: TcpStream,
    node: Address<NodeMessage>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ChatError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session_id = SessionId::new();

    // Join: the first frame must name the user
    let joined = tokio::select! {
        joined = await_join(&mut ws_receiver, &config) => joined,
        _ = shutdown.changed() => {
            debug!("Transport shutting down, dropping session {} before join", session_id);
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };
    let username = match joined {
        Ok(Some(username)) => username,
        Ok(None) => {
            debug!("Session {} closed before joining", session_id);
            return Ok(());
        }
        Err(e) => return reject(ws_sender, e).await,
    };

    // Admission
    // An abandoned admission is rolled back by the node
    let admitted = tokio::select! {
        admitted = node.admit(username.clone(), config.admission_timeout()) => admitted,
        _ = shutdown.changed() => {
            debug!("Transport shutting down, dropping session {} during admission", session_id);
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };
    let admission = match admitted {
        Ok(admission) => admission,
        Err(e) => return reject(ws_sender, e).await,
    };
    let user = admission.user;

    // Register the program so ingress has somewhere to go
    let (ingress_tx, mut ingress_rx) = mpsc::channel::<IngressMessage>(config.session_buffer);
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(config.session_buffer);
    user.send(UserMessage::RegisterProgram(Program::new(session_id, ingress_tx)))?;

    info!(
        "Session {} joined as {} from {}",
        session_id, username, peer_addr
    );
    let welcome = ServerMessage::Welcome {
        username: username.clone(),
        node: admission.node.id().to_string(),
    };
    if let Err(e) = send_frame(&mut ws_sender, &welcome).await {
        let _ = user.send(UserMessage::Disconnect);
        return Err(e);
    }

    // Spawn read task (WebSocket -> user actor)
    let read_user = user.clone();
    let read_node = admission.node.clone();
    let read_config = config.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Say { text }) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        match EgressMessage::parse(read_user.id().clone(), &text) {
                            Ok(msg) => {
                                if read_user.send(UserMessage::Egress(msg)).is_err() {
                                    debug!("User actor gone, ending read task for {}", session_id);
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = reply_tx.send(ServerMessage::from(&e)).await;
                            }
                        }
                    }
                    Ok(ClientMessage::Who) => {
                        let reply = match read_node.status(read_config.admission_timeout()).await
                        {
                            Ok(status) => ServerMessage::Users {
                                usernames: status.users,
                            },
                            Err(e) => ServerMessage::from(&e),
                        };
                        let _ = reply_tx.send(reply).await;
                    }
                    Ok(ClientMessage::Join { .. }) => {
                        let _ = reply_tx
                            .send(ServerMessage::Error {
                                code: ErrorCode::AlreadyJoined,
                                message: "Already joined".to_string(),
                            })
                            .await;
                    }
                    Ok(ClientMessage::Leave) => {
                        debug!("Session {} left", session_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", session_id, e);
                        let _ = reply_tx.send(ServerMessage::from(&ChatError::Json(e))).await;
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Session {} sent close frame", session_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Pong is handled automatically by tungstenite
                }
                Ok(other) => {
                    warn!("Ignoring unsupported frame from {}: {:?}", session_id, other);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", session_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", session_id);
    });

    // Spawn write task (user actor / replies -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(ingress) = ingress_rx.recv() => ServerMessage::from(ingress),
                Some(reply) = reply_rx.recv() => reply,
                _ = shutdown.changed() => {
                    debug!("Transport shutting down, closing session {}", session_id);
                    break;
                }
                else => break,
            };
            if send_frame(&mut ws_sender, &msg).await.is_err() {
                debug!("WebSocket send failed, ending write task");
                break;
            }
        }
        debug!("Write task ended for {}", session_id);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    let read_finished = tokio::select! {
        _ = &mut read_task => true,
        _ = &mut write_task => false,
    };
    if read_finished {
        debug!("Read task completed for {}", session_id);
        write_task.abort();
    } else {
        debug!("Write task completed for {}", session_id);
        read_task.abort();
    }

    // Hand the user back to the node
    let _ = user.send(UserMessage::Disconnect);

    info!("Session {} ({}) disconnected", session_id, username);

    Ok(())
}

/// Wait for the `join` frame and validate the username
///
/// `Ok(None)` means the client went away before joining.
async fn await_join(
    ws_receiver: &mut WsReceiver,
    config: &Config,
) -> Result<Option<String>, ChatError> {
    let timeout = config.join_timeout();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let frame = match tokio::time::timeout_at(deadline, ws_receiver.next()).await {
            Ok(frame) => frame,
            Err(_) => return Err(ChatError::JoinTimeout(timeout)),
        };

        match frame {
            None | Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Text(text))) => {
                return match serde_json::from_str::<ClientMessage>(&text)? {
                    ClientMessage::Join { username } => {
                        validate_username(&username, config.max_username_len).map(Some)
                    }
                    _ => Err(ChatError::JoinRequired),
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Report a setup failure to the client, close, and hand the error back
async fn reject(mut ws_sender: WsSender, err: ChatError) -> Result<(), ChatError> {
    info!("Rejecting session: {}", err);
    let _ = send_frame(&mut ws_sender, &ServerMessage::from(&err)).await;
    let _ = ws_sender.close().await;
    Err(err)
}

async fn send_frame(ws_sender: &mut WsSender, msg: &ServerMessage) -> Result<(), ChatError> {
    let json = serde_json::to_string(msg)?;
    ws_sender.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Usernames become actor path segments: non-empty, no whitespace or `/`
pub fn validate_username(raw: &str, max_len: usize) -> Result<String, ChatError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ChatError::InvalidUsername("username is empty".to_string()));
    }
    if username.chars().count() > max_len {
        return Err(ChatError::InvalidUsername(format!(
            "username longer than {} characters",
            max_len
        )));
    }
    if username
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/')
    {
        return Err(ChatError::InvalidUsername(format!(
            "'{}' contains forbidden characters",
            username
        )));
    }
    Ok(username.to_string())
}
