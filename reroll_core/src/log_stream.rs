//! Streams structured log events to TCP clients.
//!
//! Each event becomes a JSON [`LogEnvelope`] framed with a little-endian
//! `u32` length prefix. Slow or disconnected clients are dropped.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{info, warn, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Serialize)]
pub struct LogEnvelope {
    pub timestamp_ms: u64,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Length-prefixed JSON frame for one envelope.
pub fn encode_frame(envelope: &LogEnvelope) -> Result<Vec<u8>, serde_json::Error> {
    let payload = serde_json::to_vec(envelope)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// `tracing` layer that forwards events whose target starts with a prefix.
#[derive(Clone)]
pub struct LogForwardLayer {
    sender: Sender<LogEnvelope>,
    target_prefix: &'static str,
}

impl LogForwardLayer {
    pub fn new(sender: Sender<LogEnvelope>) -> Self {
        Self {
            sender,
            target_prefix: "",
        }
    }

    pub fn with_target_prefix(mut self, prefix: &'static str) -> Self {
        self.target_prefix = prefix;
        self
    }
}

impl<S> Layer<S> for LogForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with(self.target_prefix) {
            return;
        }
        let mut visitor = EnvelopeVisitor::default();
        event.record(&mut visitor);
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let _ = self.sender.send(LogEnvelope {
            timestamp_ms,
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor
                .message
                .unwrap_or_else(|| metadata.target().to_string()),
            fields: visitor.fields,
        });
    }
}

/// Keeps the broadcast thread fed. Dropping every handle and layer stops it.
pub struct LogStreamHandle {
    sender: Sender<LogEnvelope>,
    local_addr: SocketAddr,
}

impl LogStreamHandle {
    pub fn layer(&self) -> LogForwardLayer {
        LogForwardLayer::new(self.sender.clone()).with_target_prefix("reroll")
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

pub fn start_log_stream_server(bind_addr: SocketAddr) -> io::Result<LogStreamHandle> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let (sender, receiver) = unbounded::<LogEnvelope>();
    let clients = Arc::new(Mutex::new(Vec::new()));
    thread::Builder::new()
        .name("log-stream".to_string())
        .spawn(move || run_log_stream(listener, clients, receiver))?;

    Ok(LogStreamHandle { sender, local_addr })
}

fn run_log_stream(
    listener: TcpListener,
    clients: Arc<Mutex<Vec<TcpStream>>>,
    receiver: Receiver<LogEnvelope>,
) {
    loop {
        accept_pending(&listener, &clients);

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(first) => {
                for envelope in std::iter::once(first).chain(receiver.try_iter()) {
                    if let Ok(frame) = encode_frame(&envelope) {
                        broadcast_frame(&clients, &frame);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn accept_pending(listener: &TcpListener, clients: &Mutex<Vec<TcpStream>>) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_nodelay(true))
                {
                    warn!(target: "reroll::server", %addr, error = %err, "log_stream.socket_setup_failed");
                }
                clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(stream);
                info!(target: "reroll::server", %addr, "log_stream.client_connected");
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!(target: "reroll::server", error = %err, "log_stream.accept_failed");
                return;
            }
        }
    }
}

fn broadcast_frame(clients: &Mutex<Vec<TcpStream>>, frame: &[u8]) {
    let mut guard = clients.lock().unwrap_or_else(PoisonError::into_inner);
    guard.retain_mut(|stream| stream.write_all(frame).is_ok());
}

#[derive(Default)]
struct EnvelopeVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl EnvelopeVisitor {
    fn record_value(&mut self, field: &Field, value: serde_json::Value) {
        if field.name() != "message" {
            self.fields.insert(field.name().to_string(), value);
            return;
        }
        self.message = Some(match value {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });
    }
}

impl Visit for EnvelopeVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.record_value(field, serde_json::Value::Number(number));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string().into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_value(field, format!("{value:?}").into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn layer_forwards_matching_targets_with_fields() {
        let (sender, receiver) = unbounded();
        let subscriber = tracing_subscriber::registry()
            .with(LogForwardLayer::new(sender).with_target_prefix("reroll"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "reroll::mutator", replaced = 42u64, region = "[1, 2]", "mutation.applied");
            tracing::info!(target: "other::crate", "ignored");
        });

        let envelope = receiver.try_recv().unwrap();
        assert_eq!(envelope.target, "reroll::mutator");
        assert_eq!(envelope.level, "INFO");
        assert_eq!(envelope.message, "mutation.applied");
        assert_eq!(envelope.fields["replaced"], serde_json::json!(42));
        assert_eq!(envelope.fields["region"], serde_json::json!("[1, 2]"));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn frames_are_length_prefixed_json() {
        let envelope = LogEnvelope {
            timestamp_ms: 5,
            level: "INFO".to_string(),
            target: "reroll::status".to_string(),
            message: "region [0, 0] done".to_string(),
            fields: serde_json::Map::new(),
        };
        let frame = encode_frame(&envelope).unwrap();
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let body: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(body["message"], "region [0, 0] done");
        assert!(body.get("fields").is_none());
    }

    #[test]
    fn connected_client_receives_frames() {
        let handle = start_log_stream_server("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut client = TcpStream::connect(handle.local_addr()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let subscriber = tracing_subscriber::registry().with(handle.layer());

        // The client is accepted on the stream thread's next poll, so keep
        // emitting until a frame arrives.
        let mut prefix = [0u8; 4];
        let received = tracing::subscriber::with_default(subscriber, || {
            (0..100).any(|_| {
                tracing::info!(target: "reroll::status", "hello");
                client.read_exact(&mut prefix).is_ok()
            })
        });
        assert!(received);

        let mut body = vec![0u8; u32::from_le_bytes(prefix) as usize];
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.read_exact(&mut body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["target"], "reroll::status");
        assert_eq!(value["message"], "hello");
    }
}
