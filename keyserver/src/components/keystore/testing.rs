//! Test utilities for keystore operations.

use std::fmt;
use std::sync::{Arc, Mutex};

use time::{OffsetDateTime, macros::datetime};
use tracing::{
    Dispatch, Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context, layer::SubscriberExt};

use super::KeyStore;
use crate::{
    clock::testing::MockClock, components::database::Database, config::KeysSection,
};

/// The time at which test clocks start.
pub(crate) const START: OffsetDateTime = datetime!(2020-06-01 12:00 UTC);

/// Creates a test KeyStore with default settings, a mock clock starting at [`START`],
/// and its events captured.
pub(crate) fn test_keystore(db: Database) -> (KeyStore, MockClock, CapturedEvents) {
    let clock = MockClock::new(START);
    let (log, events) = capture_events();
    let keystore = KeyStore::from_section(&KeysSection::default(), db)
        .with_clock(clock.clone())
        .with_log(log);
    (keystore, clock, events)
}

/// Events recorded by a [`capture_events`] dispatcher.
#[derive(Clone, Default)]
pub(crate) struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedEvents {
    /// Returns the messages of every captured event at `level`.
    pub(crate) fn at(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Returns a dispatcher that records every event, and a handle to read them back.
pub(crate) fn capture_events() -> (Dispatch, CapturedEvents) {
    let events = CapturedEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    (Dispatch::new(subscriber), events)
}
