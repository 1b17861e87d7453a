//! Capturing `tracing` events in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// A single recorded event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Event target.
    pub target: String,
    /// The event's `message` field.
    pub message: String,
    /// All other fields, rendered as strings.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Returns a field value by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns `true` if the message or any field value contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.message.contains(needle) || self.fields.values().any(|value| value.contains(needle))
    }
}

/// A [`Layer`] that records every event it sees.
///
/// Install it for the current thread with [`LogCapture::install`]. Under
/// `#[tokio::test]` (a current-thread runtime) this also captures events from
/// tasks spawned by the test.
///
/// # Example
///
/// ```
/// use keel_test::LogCapture;
/// use tracing::Level;
///
/// let capture = LogCapture::new();
/// let _guard = capture.install();
///
/// tracing::error!(status = 503, "request failed");
///
/// let errors = capture.at_level(Level::ERROR);
/// assert_eq!(errors.len(), 1);
/// assert_eq!(errors[0].field("status"), Some("503"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the capture as the default subscriber for this thread.
    ///
    /// Capturing stops when the returned guard is dropped.
    #[must_use = "capturing stops when the guard is dropped"]
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    /// Returns all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Returns the events recorded at exactly `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.filtered(|event| event.level == level)
    }

    /// Returns the events recorded for `target`.
    #[must_use]
    pub fn for_target(&self, target: &str) -> Vec<CapturedEvent> {
        self.filtered(|event| event.target == target)
    }

    /// Returns the events matching `predicate`.
    pub fn filtered(&self, predicate: impl Fn(&CapturedEvent) -> bool) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    /// Discards everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}
