//! Recording error reporter.

use std::sync::Arc;

use keel_core::{Error, ErrorReporter};
use parking_lot::Mutex;

/// An [`ErrorReporter`] that stores the message of every reported error.
///
/// Clones share the same record, so a test can hand one clone to a
/// middleware and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reported: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns this reporter as a shared trait object.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ErrorReporter> {
        Arc::new(self.clone())
    }

    /// Returns how many errors were reported.
    #[must_use]
    pub fn count(&self) -> usize {
        self.reported.lock().len()
    }

    /// Returns the messages of all reported errors, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.reported.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, err: &Error) {
        self.reported.lock().push(err.to_string());
    }
}
