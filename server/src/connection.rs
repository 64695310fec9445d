//! WebSocket connection handling: frame codec and session dispatch.
//!
//! Each accepted connection gets a reader loop and a writer task. The
//! writer pumps an unbounded queue of outbound frames into the sink, so
//! session handlers never block on slow peers; the queue's send handle is
//! what sessions hold as a [`ConnHandle`].
//!
//! The reader enforces the frame contract: oversized frames are answered
//! with an `error` and dropped, anything that fails to decode is dropped
//! silently. The first decodable frame must be a join; it binds the
//! connection to one game for its whole lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use shared::{ClientMessage, ServerMessage, MAX_FRAME_BYTES};

use crate::directory::SessionDirectory;
use crate::session::{ConnHandle, JoinError, SessionCommand, SessionHandle};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Exactly six decimal digits.
fn valid_pin(pin: &str) -> bool {
    pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Drives one client connection until it closes, then notifies the bound
/// session so the participant gets its tombstone.
pub async fn serve<S>(ws: WebSocketStream<S>, directory: Arc<SessionDirectory>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = ws.split();
    let (tx, mut outbound) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let handle = ConnHandle { id: conn_id, tx };
    // Connection-local record: which game this connection belongs to.
    let mut bound: Option<SessionHandle> = None;
    debug!("conn {conn_id}: open");

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!("conn {conn_id}: transport error: {err}");
                break;
            }
        };
        match frame {
            Message::Text(text) => dispatch(&text, conn_id, &handle, &mut bound, &directory).await,
            Message::Close(_) => break,
            // Binary, ping and pong frames are not part of the protocol.
            _ => {}
        }
    }

    debug!("conn {conn_id}: closed");
    if let Some(session) = &bound {
        session.send(SessionCommand::ConnectionClosed { conn_id });
    }
}

async fn dispatch(
    text: &str,
    conn_id: u64,
    handle: &ConnHandle,
    bound: &mut Option<SessionHandle>,
    directory: &Arc<SessionDirectory>,
) {
    if text.len() > MAX_FRAME_BYTES {
        handle.send(&ServerMessage::Error {
            message: "Message too large".into(),
        });
        return;
    }
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => {
            debug!("conn {conn_id}: dropping malformed frame");
            return;
        }
    };
    if !valid_pin(msg.pin()) {
        return;
    }

    if let Some(session) = bound.as_ref() {
        if msg.pin() != session.code {
            return;
        }
        let cmd = match msg {
            // Repeated joins on the same connection let a rejected player
            // retry under a different name; the session ignores them once
            // the connection has a role.
            ClientMessage::HostJoin { .. } => SessionCommand::HostJoin {
                conn: handle.clone(),
            },
            ClientMessage::PlayerJoin { name, .. } => SessionCommand::PlayerJoin {
                conn: handle.clone(),
                name,
            },
            ClientMessage::StartGame { .. } => SessionCommand::StartGame { conn_id },
            ClientMessage::NextQuestion { .. } => SessionCommand::NextQuestion { conn_id },
            ClientMessage::EndGame { .. } => SessionCommand::EndGame { conn_id },
            ClientMessage::Answer {
                answer, is_final, ..
            } => SessionCommand::Answer {
                conn_id,
                selection: answer,
                is_final,
            },
        };
        session.send(cmd);
        return;
    }

    match msg {
        ClientMessage::HostJoin { pin } => {
            if let Some(session) = join(&pin, handle, directory).await {
                session.send(SessionCommand::HostJoin {
                    conn: handle.clone(),
                });
                *bound = Some(session);
            }
        }
        ClientMessage::PlayerJoin { pin, name } => {
            if let Some(session) = join(&pin, handle, directory).await {
                session.send(SessionCommand::PlayerJoin {
                    conn: handle.clone(),
                    name,
                });
                *bound = Some(session);
            }
        }
        // Everything else requires a bound connection first.
        _ => {}
    }
}

async fn join(
    pin: &str,
    handle: &ConnHandle,
    directory: &Arc<SessionDirectory>,
) -> Option<SessionHandle> {
    match directory.lookup(pin).await {
        Some(session) => Some(session),
        None => {
            handle.send(&ServerMessage::Error {
                message: JoinError::NotFound.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_must_be_exactly_six_digits() {
        assert!(valid_pin("123456"));
        assert!(valid_pin("000000"));
        assert!(!valid_pin("12345"));
        assert!(!valid_pin("1234567"));
        assert!(!valid_pin("12345a"));
        assert!(!valid_pin("12 456"));
        assert!(!valid_pin(""));
    }
}
