// src/client/transport.rs
// Client side of the signaling channel.
//
// `SocketIoTransportFactory` speaks socket.io (Engine.IO v4) over a plain WebSocket,
// which is all the relay needs: namespace connect, JSON events, ping/pong.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use tokio::{net::TcpStream, sync::{mpsc, Mutex}};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::{
    error::{CallError, ProtocolError},
    types::{ClientEvent, ConnectQuery, ServerEvent},
};

/// An event produced by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Event(ServerEvent),
    /// The connection is gone. Never retried by the transport itself.
    Disconnected,
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), CallError>;
    async fn disconnect(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a connection and returns it along with its stream of events.
    async fn connect(
        &self,
        query: &ConnectQuery,
    ) -> Result<(Arc<dyn SignalingTransport>, mpsc::Receiver<TransportEvent>), CallError>;
}

// ── Packet codec ──────────────────────────────────────────────────────────────

/// The subset of Engine.IO / socket.io packets the client acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open,
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect acknowledged.
    Connected,
    Disconnect,
    ConnectError(String),
    Event(String, Value),
    /// Valid but irrelevant here (acks, binary, upgrade).
    Other,
}

pub fn decode_packet(text: &str) -> Result<Packet, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| ProtocolError::Packet("empty frame".into()))?;
    let rest = chars.as_str();

    Ok(match kind {
        '0' => Packet::Open,
        '1' => Packet::Close,
        '2' => Packet::Ping,
        '3' => Packet::Pong,
        '5' => Packet::Other,
        '6' => Packet::Noop,
        '4' => decode_socket_packet(rest)?,
        other => return Err(ProtocolError::Packet(format!("unknown engine packet type '{other}'"))),
    })
}

fn decode_socket_packet(text: &str) -> Result<Packet, ProtocolError> {
    let mut chars = text.chars();
    let Some(kind) = chars.next() else {
        return Err(ProtocolError::Packet("empty message".into()));
    };
    let body = chars.as_str();

    // Default namespace only; a "/nsp," prefix is skipped.
    let body = match body.strip_prefix('/') {
        Some(nsp) => nsp.split_once(',').map(|(_, b)| b).unwrap_or(""),
        None => body,
    };

    Ok(match kind {
        '0' => Packet::Connected,
        '1' => Packet::Disconnect,
        '4' => Packet::ConnectError(body.to_owned()),
        '2' => {
            // optional ack id before the array
            let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut args: Vec<Value> = serde_json::from_str(body)?;
            if args.is_empty() {
                return Err(ProtocolError::Packet("event without name".into()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(ProtocolError::Packet(format!("event name {other} is not a string"))),
            };
            let data = if args.is_empty() { Value::Null } else { args.remove(0) };
            Packet::Event(name, data)
        }
        _ => Packet::Other,
    })
}

pub fn encode_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    let frame = serde_json::to_string(&serde_json::json!([event.name(), event.payload()?]))?;
    Ok(format!("42{frame}"))
}

/// `http(s)://host[:port]` → `ws(s)://host[:port]/socket.io/?EIO=4&transport=websocket&...`
pub fn socket_url(server_url: &str, query: &ConnectQuery) -> Result<String, CallError> {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_owned()
    } else {
        return Err(CallError::Transport(format!("unsupported server url: {server_url}")));
    };

    let mut url = format!("{base}/socket.io/?EIO=4&transport=websocket");
    let extra = query.to_query_string();
    if !extra.is_empty() {
        url.push('&');
        url.push_str(&extra);
    }
    Ok(url)
}

// ── WebSocket transport ───────────────────────────────────────────────────────

type RawWs    = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink   = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;
type SharedSink = Arc<Mutex<Option<WsSink>>>;

pub struct SocketIoTransport {
    sink: SharedSink,
}

#[async_trait]
impl SignalingTransport for SocketIoTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), CallError> {
        let frame = encode_event(&event)?;
        trace!("--> {frame}");
        send_text(&self.sink, frame).await
    }

    async fn disconnect(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(Message::text("41")).await;
            let _ = sink.close().await;
        }
    }
}

async fn send_text(sink: &SharedSink, text: String) -> Result<(), CallError> {
    let mut guard = sink.lock().await;
    let sink = guard.as_mut().ok_or(CallError::NotConnected)?;
    sink.send(Message::text(text))
        .await
        .map_err(|e| CallError::Transport(e.to_string()))
}

pub struct SocketIoTransportFactory {
    server_url: String,
}

impl SocketIoTransportFactory {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { server_url: server_url.into() }
    }
}

#[async_trait]
impl TransportFactory for SocketIoTransportFactory {
    async fn connect(
        &self,
        query: &ConnectQuery,
    ) -> Result<(Arc<dyn SignalingTransport>, mpsc::Receiver<TransportEvent>), CallError> {
        let url = socket_url(&self.server_url, query)?;
        info!("[ws] dialing {url}");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| CallError::Transport(format!("connect failed: {e}")))?;
        let (sink, stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(Some(sink)));

        let (event_tx, event_rx) = mpsc::channel(100);
        tokio::spawn(read_pump(stream, sink.clone(), event_tx));

        Ok((Arc::new(SocketIoTransport { sink }), event_rx))
    }
}

async fn read_pump(mut stream: WsStream, sink: SharedSink, events: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("[ws] read error: {e}");
                break;
            }
        };
        trace!("<-- {}", text.as_str());

        let packet = match decode_packet(text.as_str()) {
            Ok(p) => p,
            Err(e) => {
                warn!("[ws] dropping frame: {e}");
                continue;
            }
        };

        match packet {
            // Engine handshake done: join the default namespace.
            Packet::Open => {
                if send_text(&sink, "40".to_owned()).await.is_err() { break; }
            }
            Packet::Ping => {
                if send_text(&sink, "3".to_owned()).await.is_err() { break; }
            }
            Packet::Connected => {
                info!("[ws] connected to signaling server");
                let _ = events.send(TransportEvent::Connected).await;
            }
            Packet::Event(name, data) => match ServerEvent::from_parts(&name, data) {
                Ok(event) => {
                    if events.send(TransportEvent::Event(event)).await.is_err() { break; }
                }
                Err(e) => debug!("[ws] ignoring '{name}': {e}"),
            },
            Packet::ConnectError(reason) => {
                warn!("[ws] connection refused: {reason}");
                break;
            }
            Packet::Disconnect | Packet::Close => break,
            Packet::Pong | Packet::Noop | Packet::Other => {}
        }
    }

    sink.lock().await.take();
    let _ = events.send(TransportEvent::Disconnected).await;
    info!("[ws] disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{event, CallEndedPayload, EndCallPayload};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended early: {other:?}"),
            }
        }
    }

    #[test]
    fn decodes_engine_and_namespace_packets() {
        assert_eq!(decode_packet(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(), Packet::Open);
        assert_eq!(decode_packet("2").unwrap(), Packet::Ping);
        assert_eq!(decode_packet(r#"40{"sid":"xyz"}"#).unwrap(), Packet::Connected);
        assert_eq!(decode_packet("41").unwrap(), Packet::Disconnect);
        assert_eq!(
            decode_packet(r#"44{"message":"refused"}"#).unwrap(),
            Packet::ConnectError(r#"{"message":"refused"}"#.into()),
        );
        assert!(decode_packet("").is_err());
        assert!(decode_packet("9").is_err());
    }

    #[test]
    fn decodes_event_with_payload() {
        let p = decode_packet(r#"42["callEnded",{"roomId":"r1"}]"#).unwrap();
        assert_eq!(p, Packet::Event(event::CALL_ENDED.into(), json!({ "roomId": "r1" })));

        // ack id and explicit namespace prefix
        let p = decode_packet(r#"42/,7["newCall",{}]"#).unwrap();
        assert_eq!(p, Packet::Event(event::NEW_CALL.into(), json!({})));

        let p = decode_packet(r#"42["ping"]"#).unwrap();
        assert_eq!(p, Packet::Event("ping".into(), Value::Null));
    }

    #[test]
    fn malformed_event_is_an_error() {
        assert!(decode_packet("42[]").is_err());
        assert!(decode_packet("42[1,2]").is_err());
        assert!(decode_packet("42{").is_err());
    }

    #[test]
    fn encodes_client_event() {
        let frame = encode_event(&ClientEvent::EndCall(EndCallPayload {
            callee_id: "u2".into(),
            room_id:   Some("r1".into()),
        })).unwrap();
        assert_eq!(frame, r#"42["endCall",{"calleeId":"u2","roomId":"r1"}]"#);
    }

    #[test]
    fn builds_socket_url() {
        let q = ConnectQuery::new("u1", Some("tok".into()));
        assert_eq!(
            socket_url("http://10.0.2.2:8000/", &q).unwrap(),
            "ws://10.0.2.2:8000/socket.io/?EIO=4&transport=websocket&callerId=u1&fcmToken=tok",
        );
        assert!(socket_url("https://example.com", &q).unwrap().starts_with("wss://example.com/socket.io/"));
        assert!(socket_url("ftp://example.com", &q).is_err());
    }

    #[tokio::test]
    async fn talks_socket_io_over_a_live_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut path = String::new();
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
                path = req.uri().to_string();
                Ok::<_, ErrorResponse>(resp)
            }).await.unwrap();

            let mut heard = Vec::new();
            ws.send(Message::text(r#"0{"sid":"e1","pingInterval":25000,"pingTimeout":20000}"#)).await.unwrap();
            heard.push(next_text(&mut ws).await);
            ws.send(Message::text(r#"40{"sid":"s1"}"#)).await.unwrap();
            ws.send(Message::text("2")).await.unwrap();
            heard.push(next_text(&mut ws).await);
            ws.send(Message::text(r#"42["callEnded",{"roomId":"r1"}]"#)).await.unwrap();
            heard.push(next_text(&mut ws).await);
            let _ = ws.close(None).await;
            (path, heard)
        });

        let factory = SocketIoTransportFactory::new(format!("http://{addr}"));
        let (transport, mut events) = factory.connect(&ConnectQuery::new("u1", None)).await.unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Event(ServerEvent::CallEnded(CallEndedPayload { room_id: Some("r1".into()) }))),
        );

        let hangup = ClientEvent::EndCall(EndCallPayload { callee_id: "u2".into(), room_id: Some("r1".into()) });
        transport.send(hangup.clone()).await.unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert!(matches!(transport.send(hangup).await, Err(CallError::NotConnected)));

        let (path, heard) = server.await.unwrap();
        assert!(path.starts_with("/socket.io/?EIO=4&transport=websocket"));
        assert!(path.ends_with("&callerId=u1"));
        assert_eq!(heard, vec![
            "40".to_owned(),
            "3".to_owned(),
            r#"42["endCall",{"calleeId":"u2","roomId":"r1"}]"#.to_owned(),
        ]);
    }
}
