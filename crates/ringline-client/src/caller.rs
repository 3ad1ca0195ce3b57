//! The agent-side relay client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use ringline_core::{
    AGENT_SENTINEL, CallId, CallRequest, CallResponse, CallResult, CallStatus, CallText, Envelope,
    MessageBody, RegisterPayload, Urgency, now_ms,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::pending::{PendingCalls, ReplyWait};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client-side ceiling on one call, comfortably above the relay's own ring
/// timeout so the relay's verdict normally arrives first. This is the
/// guard against a relay that went away mid-call, not the primary timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
/// Liveness probe interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// All connection attempts failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Relay URL.
        url: String,
        /// Last attempt's error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// The connection dropped before the operation finished.
    #[error("relay connection lost")]
    ConnectionLost,
    /// Message serialization failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

struct ClientInner {
    url: String,
    call_timeout: Duration,
    pending: PendingCalls,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// One logical connection to the relay, shared by every call the agent
/// makes.
///
/// Cheap to clone. The first operation dials the relay and registers the
/// agent role; a lost connection is redialed with exponential backoff on
/// the next operation.
#[derive(Clone)]
pub struct CallerClient {
    inner: Arc<ClientInner>,
}

impl CallerClient {
    /// Create a client for the given `ws://` URL. Nothing is dialed yet.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                call_timeout: DEFAULT_CALL_TIMEOUT,
                pending: PendingCalls::new(),
                writer: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Override the per-call ceiling.
    #[must_use]
    pub fn with_call_timeout(self, timeout: Duration) -> Self {
        let inner = ClientInner {
            url: self.inner.url.clone(),
            call_timeout: timeout,
            pending: PendingCalls::new(),
            writer: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Whether a live connection is currently installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .writer
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Place a call and wait for its terminal result.
    ///
    /// Resolves with whatever the relay reports: `completed` carrying the
    /// operator's response, `failed`, or `no_answer`. If the relay stays
    /// silent past the call ceiling, a synthesized `no_answer` is returned
    /// and the correlation state is dropped.
    pub async fn initiate_call(
        &self,
        message: impl Into<String>,
        urgency: Urgency,
        context: Option<String>,
    ) -> Result<CallResult, ClientError> {
        self.ensure_connected().await?;

        let call_id = CallId::new();
        let completion = self.inner.pending.register_completion(&call_id);
        let request = CallRequest {
            call_id: call_id.clone(),
            message: message.into(),
            urgency,
            context,
            requires_response: true,
            timestamp: now_ms(),
        };
        info!(call_id = %call_id, "placing call");
        self.send(MessageBody::InitiateCall(request))?;

        match tokio::time::timeout(self.inner.call_timeout, completion).await {
            Ok(Ok(result)) => {
                info!(call_id = %call_id, status = ?result.status, "call resolved");
                Ok(result)
            }
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                warn!(call_id = %call_id, "no verdict from the relay, giving up");
                self.inner.pending.remove(&call_id);
                Ok(CallResult {
                    call_id,
                    status: CallStatus::NoAnswer,
                    error: Some("timed out waiting for the relay".into()),
                    duration: None,
                    user_response: None,
                })
            }
        }
    }

    /// Wait up to `timeout` for the operator's reply on a call.
    ///
    /// Dials the relay first if no connection is live, like every other
    /// operation. Returns the reply even if it arrived before this was
    /// called.
    pub async fn wait_for_response(
        &self,
        call_id: &CallId,
        timeout: Duration,
    ) -> Option<CallResponse> {
        if let Err(error) = self.ensure_connected().await {
            // A buffered reply may still be present; fall through to the
            // lookup and let the timeout produce the None.
            warn!(call_id = %call_id, %error, "waiting without a relay connection");
        }
        match self.inner.pending.subscribe_reply(call_id) {
            ReplyWait::Ready(response) => Some(response),
            ReplyWait::Pending(rx) => tokio::time::timeout(timeout, rx)
                .await
                .ok()
                .and_then(Result::ok),
        }
    }

    /// Send follow-up text on a connected call. Fire-and-forget.
    pub async fn send_text(
        &self,
        call_id: &CallId,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        self.send(MessageBody::SendMessage(CallText {
            call_id: call_id.clone(),
            message: message.into(),
        }))
    }

    /// Dial the relay if no live connection is installed, retrying with
    /// backoff. Registers the agent role on every fresh connection.
    async fn ensure_connected(&self) -> Result<(), ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let mut backoff = Backoff::new();
        loop {
            match connect_async(self.inner.url.as_str()).await {
                Ok((socket, _)) => {
                    self.install(socket);
                    self.send(MessageBody::Register(RegisterPayload {
                        user_id: Some(AGENT_SENTINEL.into()),
                    }))?;
                    info!(url = %self.inner.url, "connected to relay");
                    return Ok(());
                }
                Err(error) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            url = %self.inner.url,
                            attempt = backoff.attempts(),
                            ?delay,
                            %error,
                            "connect failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(ClientError::Connect {
                            url: self.inner.url.clone(),
                            source: Box::new(error),
                        });
                    }
                },
            }
        }
    }

    /// Split the socket into write and read tasks and start the heartbeat.
    fn install(&self, socket: WsStream) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let heartbeat_tx = tx.clone();
        *self.inner.writer.lock() = Some(tx);
        let (mut sink, mut stream) = socket.split();

        drop(tokio::spawn(async move {
            while let Some(json) = rx.recv().await {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        drop(tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => dispatch(&inner, text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(%error, "relay read error");
                        break;
                    }
                }
            }
            // Anyone still waiting learns the connection is gone.
            inner.pending.fail_all("connection lost");
            *inner.writer.lock() = None;
            debug!("relay connection closed");
        }));

        // The heartbeat task is bound to this connection's sender: a
        // reconnect installs a new writer, and the old task stands down at
        // its next tick instead of pumping heartbeats into the replacement.
        let inner = Arc::clone(&self.inner);
        drop(tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if !is_current_writer(&inner, &heartbeat_tx) {
                    break;
                }
                let Ok(json) = serde_json::to_string(&Envelope::new(MessageBody::Heartbeat {}))
                else {
                    break;
                };
                if heartbeat_tx.send(json).is_err() {
                    break;
                }
            }
        }));
    }

    fn send(&self, body: MessageBody) -> Result<(), ClientError> {
        let json = serde_json::to_string(&Envelope::new(body))?;
        let guard = self.inner.writer.lock();
        match guard.as_ref() {
            Some(tx) if tx.send(json).is_ok() => Ok(()),
            _ => Err(ClientError::ConnectionLost),
        }
    }
}

/// Whether `tx` is still the installed writer. Tasks tied to an old
/// connection use this to detect they were superseded by a reconnect.
fn is_current_writer(inner: &ClientInner, tx: &mpsc::UnboundedSender<String>) -> bool {
    inner
        .writer
        .lock()
        .as_ref()
        .is_some_and(|current| current.same_channel(tx))
}

fn dispatch(inner: &Arc<ClientInner>, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%error, "dropping unparseable relay message");
            return;
        }
    };
    match envelope.body {
        MessageBody::CallStatus(result) => {
            let _ = inner.pending.complete(result);
        }
        MessageBody::UserResponse(response) => inner.pending.reply(response),
        // Heartbeat echoes and operator-facing types carry nothing for us.
        _ => debug!("ignoring relay message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let client = CallerClient::new("ws://127.0.0.1:9/ws");
        assert!(!client.is_connected());
    }

    #[test]
    fn send_without_connection_is_connection_lost() {
        let client = CallerClient::new("ws://127.0.0.1:9/ws");
        let err = client.send(MessageBody::Heartbeat {}).unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost));
    }

    #[test]
    fn call_ceiling_defaults_to_two_minutes() {
        assert_eq!(DEFAULT_CALL_TIMEOUT, Duration::from_secs(120));
        assert_eq!(HEARTBEAT_INTERVAL, Duration::from_secs(30));
    }

    #[test]
    fn superseded_writer_is_no_longer_current() {
        let client = CallerClient::new("ws://127.0.0.1:9/ws");
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        *client.inner.writer.lock() = Some(old_tx.clone());
        assert!(is_current_writer(&client.inner, &old_tx));

        // A reconnect installs a fresh sender; the old one must read as
        // stale so its heartbeat task exits.
        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        *client.inner.writer.lock() = Some(new_tx.clone());
        assert!(!is_current_writer(&client.inner, &old_tx));
        assert!(is_current_writer(&client.inner, &new_tx));

        *client.inner.writer.lock() = None;
        assert!(!is_current_writer(&client.inner, &new_tx));
    }
}
