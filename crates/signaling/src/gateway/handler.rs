//! Per-connection request/response/event loop

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::protocol::{
    CreateRoomResult, ErrorBody, ProduceResult, RequestBody, ResponseErr, ResponseOk, ServerEvent,
    SignalRequest,
};
use crate::error::codes;
use crate::session::{SessionCoordinator, SessionEvent};
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Serve one signaling connection until the peer disconnects.
///
/// Requests from the peer are handled strictly in arrival order; engine-bound
/// calls suspend this connection only. Unsolicited events arrive through the
/// peer's registry channel and are interleaved between requests.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    coordinator: Arc<SessionCoordinator>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;
    let (mut sink, mut source) = ws.split();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let welcome = match coordinator.register_peer(event_tx).await {
        Ok(welcome) => welcome,
        Err(err) => {
            // Admission failed (peer limit, dead engine): tell the peer and
            // drop the connection.
            let _ = send_json(
                &mut sink,
                &ResponseErr {
                    id: 0,
                    error: ErrorBody {
                        code: err.code(),
                        message: err.to_string(),
                    },
                },
            )
            .await;
            return Err(err);
        }
    };
    let peer_id = welcome.peer_id.clone();

    send_json(
        &mut sink,
        &ServerEvent::ConnectionEstablished {
            peer_id: peer_id.clone(),
            producer_exists: welcome.producer_exists,
        },
    )
    .await?;
    info!(peer_id = %peer_id, "peer connected");

    let result = connection_loop(&mut sink, &mut source, &mut event_rx, &coordinator, &peer_id).await;

    coordinator.deregister_peer(&peer_id).await;
    info!(peer_id = %peer_id, "peer connection closed");
    result
}

async fn connection_loop(
    sink: &mut WsSink,
    source: &mut WsSource,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    coordinator: &Arc<SessionCoordinator>,
    peer_id: &str,
) -> Result<()> {
    loop {
        tokio::select! {
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let reply = dispatch(coordinator, peer_id, &text).await;
                        sink.send(Message::Text(reply))
                            .await
                            .map_err(|e| Error::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| Error::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us.
                    }
                    Some(Err(err)) => {
                        return Err(Error::WebSocket(err.to_string()));
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        send_json(sink, &ServerEvent::from(event)).await?;
                    }
                    None => break,
                }
            }
        }
    }
    Ok(())
}

/// Map one inbound text frame to exactly one response frame.
async fn dispatch(coordinator: &Arc<SessionCoordinator>, peer_id: &str, text: &str) -> String {
    let request: SignalRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            debug!(peer_id, error = %err, "unparseable signaling request");
            return error_response(request_id_of(text), codes::PARSE_ERROR, &err.to_string());
        }
    };

    let id = request.id;
    let method = request.body.method_name();

    match handle_request(coordinator, peer_id, request.body).await {
        Ok(result) => match serde_json::to_string(&ResponseOk { id, result }) {
            Ok(json) => json,
            Err(err) => error_response(id, codes::INTERNAL_ERROR, &err.to_string()),
        },
        Err(err) => {
            if err.is_request_error() {
                debug!(peer_id, method, error = %err, "request failed");
            } else {
                warn!(peer_id, method, error = %err, "request failed");
            }
            error_response(id, err.code(), &err.to_string())
        }
    }
}

async fn handle_request(
    coordinator: &Arc<SessionCoordinator>,
    peer_id: &str,
    body: RequestBody,
) -> Result<serde_json::Value> {
    match body {
        RequestBody::CreateRoom => {
            let rtp_capabilities = coordinator.ensure_router().await?;
            to_value(&CreateRoomResult { rtp_capabilities })
        }
        RequestBody::CreateTransport { direction } => {
            let descriptor = coordinator.create_transport(peer_id, direction).await?;
            to_value(&descriptor)
        }
        RequestBody::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            coordinator
                .connect_transport(peer_id, &transport_id, &dtls_parameters)
                .await?;
            Ok(serde_json::json!({}))
        }
        RequestBody::Produce {
            transport_id,
            kind,
            rtp_parameters,
            app_data,
        } => {
            let producer_id = coordinator
                .produce(peer_id, &transport_id, kind, rtp_parameters, app_data)
                .await?;
            to_value(&ProduceResult { producer_id })
        }
        RequestBody::Consume {
            transport_id,
            producer_id,
            rtp_capabilities,
        } => {
            let descriptor = coordinator
                .consume(peer_id, &transport_id, &producer_id, &rtp_capabilities)
                .await?;
            to_value(&descriptor)
        }
        RequestBody::ConsumerResume { consumer_id } => {
            coordinator.resume_consumer(peer_id, &consumer_id).await?;
            Ok(serde_json::json!({}))
        }
        RequestBody::ConsumerPause { consumer_id } => {
            coordinator.pause_consumer(peer_id, &consumer_id).await?;
            Ok(serde_json::json!({}))
        }
        RequestBody::ConsumerClose { consumer_id } => {
            coordinator.close_consumer(peer_id, &consumer_id).await?;
            Ok(serde_json::json!({}))
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn error_response(id: u64, code: i32, message: &str) -> String {
    let response = ResponseErr {
        id,
        error: ErrorBody {
            code,
            message: message.to_string(),
        },
    };
    // A struct of plain fields serializes; fall back to a static frame if not.
    serde_json::to_string(&response)
        .unwrap_or_else(|_| format!(r#"{{"id":{id},"error":{{"code":{code},"message":"internal error"}}}}"#))
}

/// Best-effort extraction of the correlation id from an unparseable frame
fn request_id_of(text: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("id")?.as_u64())
        .unwrap_or(0)
}

async fn send_json<T: Serialize>(sink: &mut WsSink, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_of_extracts_id() {
        assert_eq!(request_id_of(r#"{"id":42,"method":"bogus"}"#), 42);
        assert_eq!(request_id_of("not json"), 0);
        assert_eq!(request_id_of(r#"{"method":"create-room"}"#), 0);
    }

    #[test]
    fn test_error_response_is_valid_json() {
        let frame = error_response(3, codes::NOT_FOUND, "unknown producer");
        let parsed: ResponseErr = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.id, 3);
        assert_eq!(parsed.error.code, codes::NOT_FOUND);
    }
}
