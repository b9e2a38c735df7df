//! Shared fakes for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};
use uuid::Uuid;

use crate::event::Context;
use crate::identifier::{Identifier, Set};
use crate::notification::Notification;
use crate::preference::Provider;
use crate::transport::{Transport, TransportError, TransportKey};
use crate::validate::{Validate, ValidationError};

/// A notification with message `"test message"` and a fresh ID.
pub fn notification(event_type: &str, recipient: &[&str]) -> Notification {
    let recipient: Set = recipient
        .iter()
        .map(|s| s.parse::<Identifier>().unwrap())
        .collect();
    Notification::builder(Context::new(Uuid::new_v4().to_string(), "/test", event_type).unwrap())
        .recipient(recipient)
        .message("test message")
        .build()
}

/// Replays a fixed list of outcomes, then succeeds forever.
pub struct ScriptedTransport {
    key: TransportKey,
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(key: &str, script: Vec<Result<(), TransportError>>) -> Self {
        ScriptedTransport {
            key: TransportKey::new(key),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn key(&self) -> TransportKey {
        self.key.clone()
    }

    async fn push(&self, _: &CancellationToken, _: &Notification) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// An in-memory `Write` whose contents outlive the writer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Always gives the same answer.
pub struct FixedProvider(pub Option<bool>);

#[async_trait]
impl Provider for FixedProvider {
    async fn wants(&self, _: &CancellationToken, _: &Notification, _: &TransportKey) -> Option<bool> {
        self.0
    }
}

/// A provider whose startup check always fails.
pub struct FailingValidator;

#[async_trait]
impl Provider for FailingValidator {
    async fn wants(&self, _: &CancellationToken, _: &Notification, _: &TransportKey) -> Option<bool> {
        None
    }

    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[async_trait]
impl Validate for FailingValidator {
    async fn validate(&self, _: &CancellationToken) -> Result<(), ValidationError> {
        Err(ValidationError::new("test", "always fails"))
    }
}

/// One `tracing` event seen by [`LogCapture`], with every field rendered to a
/// string. The format string is stored under `message`.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.field("message").unwrap_or_default()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A layer that records events so tests can assert on log output.
///
/// Installed per thread, so use it from `#[tokio::test]` (current-thread).
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<CapturedEvent>>>);

impl LogCapture {
    /// Makes this capture the thread's default subscriber until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message() == message)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut fields = FieldRecorder::default();
        event.record(&mut fields);
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

#[derive(Default)]
struct FieldRecorder(BTreeMap<String, String>);

impl Visit for FieldRecorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
