//! The post-upgrade WebSocket session.
//!
//! After the 101 response is flushed, the connection driver hands its
//! transport to [`session`], which owns the framed stream: it dispatches
//! inbound frames to the service's [`WsEndpoint`], answers PING with PONG,
//! reassembles fragmented messages, and (when configured) drives the
//! heartbeat that replaces the generic keep-alive timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::protocol::SendError;
use crate::websocket::frame::{FrameCodec, Opcode, WsFrame};

/// A complete, reassembled WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
}

/// Service-side endpoint of an upgraded connection.
#[async_trait]
pub trait WsEndpoint: Send + Sync {
    async fn on_open(&self, _channel: &WebSocketChannel) {}

    async fn on_message(&self, _channel: &WebSocketChannel, _message: WsMessage) {}

    async fn on_close(&self) {}
}

/// Sending half of an upgraded connection, usable from any task.
#[derive(Clone)]
pub struct WebSocketChannel {
    out: mpsc::Sender<WsFrame>,
}

impl WebSocketChannel {
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send_frame(WsFrame::text(text.into().into_bytes())).await
    }

    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        self.send_frame(WsFrame::binary(payload)).await
    }

    pub async fn send_ping(&self) -> Result<(), SendError> {
        self.send_frame(WsFrame::ping(Bytes::new())).await
    }

    /// Sends a close frame; the session ends once it is on the wire.
    pub async fn close(&self) -> Result<(), SendError> {
        self.send_frame(WsFrame::close()).await
    }

    async fn send_frame(&self, frame: WsFrame) -> Result<(), SendError> {
        self.out.send(frame).await.map_err(|_| SendError::invalid_body("websocket session ended"))
    }
}

/// Heartbeat intervals below this floor are clamped up to it.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1000);

/// Runs the session until either side closes. `leftover` holds bytes that
/// arrived together with the upgrade request.
pub(crate) async fn session<T>(
    io: T,
    leftover: BytesMut,
    endpoint: Arc<dyn WsEndpoint>,
    ping_interval: Option<Duration>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, FrameCodec);
    if !leftover.is_empty() {
        framed.read_buffer_mut().unsplit(leftover);
    }

    let (out_tx, mut out_rx) = mpsc::channel::<WsFrame>(16);
    let channel = WebSocketChannel { out: out_tx };

    endpoint.on_open(&channel).await;

    let mut heartbeat: Option<Interval> = ping_interval.map(|interval| {
        let interval = interval.max(MIN_PING_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });
    let mut last_send_ping: Option<Instant> = None;
    let mut last_recv_pong: Option<Instant> = None;

    // reassembly buffer for a fragmented message
    let mut partial: Option<(Opcode, BytesMut)> = None;

    loop {
        tokio::select! {
            item = framed.next() => {
                let frame = match item {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("websocket parse error: {}", e);
                        break;
                    }
                    None => break,
                };

                match frame.opcode {
                    Opcode::Close => {
                        let _ = framed.send(WsFrame::close()).await;
                        break;
                    }
                    Opcode::Ping => {
                        if framed.send(WsFrame::pong(frame.payload)).await.is_err() {
                            break;
                        }
                    }
                    Opcode::Pong => {
                        last_recv_pong = Some(Instant::now());
                    }
                    Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                        match assemble(&mut partial, frame) {
                            Ok(Some(message)) => endpoint.on_message(&channel, message).await,
                            Ok(None) => {}
                            Err(reason) => {
                                warn!("closing websocket: {}", reason);
                                let _ = framed.send(WsFrame::close()).await;
                                break;
                            }
                        }
                    }
                }
            }

            Some(frame) = out_rx.recv() => {
                let is_close = frame.opcode == Opcode::Close;
                if framed.send(frame).await.is_err() {
                    break;
                }
                if is_close {
                    break;
                }
            }

            _ = tick(&mut heartbeat) => {
                // no pong since our last ping means the peer is gone
                if last_send_ping.is_some() && last_recv_pong < last_send_ping {
                    warn!("websocket no pong, closing");
                    let _ = framed.send(WsFrame::close()).await;
                    break;
                }
                if framed.send(WsFrame::ping(Bytes::new())).await.is_err() {
                    break;
                }
                last_send_ping = Some(Instant::now());
            }
        }
    }

    debug!("websocket session ended");
    endpoint.on_close().await;
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending().await,
    }
}

/// Folds a data frame into the reassembly buffer; returns a complete
/// message when a final frame arrives.
fn assemble(partial: &mut Option<(Opcode, BytesMut)>, frame: WsFrame) -> Result<Option<WsMessage>, &'static str> {
    let (opcode, payload) = match (frame.opcode, partial.as_mut()) {
        (Opcode::Continuation, Some((_, buffer))) => {
            buffer.extend_from_slice(&frame.payload);
            if !frame.fin {
                return Ok(None);
            }
            let (opcode, buffer) = partial.take().unwrap();
            (opcode, buffer.freeze())
        }
        (Opcode::Continuation, None) => return Err("continuation frame without a message start"),
        (_, Some(_)) => return Err("new message started inside a fragmented one"),
        (opcode, None) => {
            if !frame.fin {
                *partial = Some((opcode, BytesMut::from(&frame.payload[..])));
                return Ok(None);
            }
            (opcode, frame.payload)
        }
    };

    match opcode {
        Opcode::Text => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Ok(Some(WsMessage::Text(text))),
            Err(_) => Err("text message is not valid utf-8"),
        },
        Opcode::Binary => Ok(Some(WsMessage::Binary(payload))),
        _ => Err("unexpected opcode in message assembly"),
    }
}
