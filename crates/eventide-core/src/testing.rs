//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use crate::aggregate::Aggregate;
use crate::clock::Clock;
use crate::error::AggregateError;
use crate::event::DomainEvent;
use crate::registry::EventTypeRegistry;

pub(crate) struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub(crate) fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()))
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SettingsEvent {
    Set(Value),
    Noted(String),
}

impl DomainEvent for SettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Set(_) => "SettingsSet",
            Self::Noted(_) => "SettingsNoted",
        }
    }

    fn serialize(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Self::Set(values) => json!({ "values": values }),
            Self::Noted(note) => json!({ "note": note }),
        })
    }
}

pub(crate) fn settings_registry() -> Arc<EventTypeRegistry<SettingsEvent>> {
    let registry = EventTypeRegistry::builder()
        .register("settings.set", "SettingsSet", |mut v| {
            Ok(SettingsEvent::Set(
                v.get_mut("values").map(Value::take).unwrap_or(Value::Null),
            ))
        })
        .register("settings.noted", "SettingsNoted", |v| {
            serde_json::from_value(v["note"].clone()).map(SettingsEvent::Noted)
        })
        .build()
        .unwrap();
    Arc::new(registry)
}

/// Last-write-wins key/value state with snapshot support.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Settings {
    pub values: Value,
}

impl Aggregate for Settings {
    type Event = SettingsEvent;

    fn apply(&mut self, event: &SettingsEvent) {
        match event {
            SettingsEvent::Set(values) => self.values = values.clone(),
            SettingsEvent::Noted(_) => {}
        }
    }

    fn snapshot(&self) -> Result<Value, AggregateError> {
        Ok(self.values.clone())
    }

    fn restore(&mut self, payload: Value) -> Result<(), AggregateError> {
        self.values = payload;
        Ok(())
    }
}

/// An aggregate that never implemented snapshots.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Untracked;

impl Aggregate for Untracked {
    type Event = SettingsEvent;

    fn apply(&mut self, _event: &SettingsEvent) {}
}
