//! Bidirectional mapping between public event names and in-process types.
//!
//! Streams store the public name, never the Rust type name, so a type can be
//! renamed or moved without breaking replay of events recorded before the
//! refactoring. Lookups fail loudly in both directions: guessing a type for
//! an unknown name could corrupt derived state.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RegistryError;
use crate::event::{DomainEvent, SNAPSHOT_EVENT_TYPE, Snapshot};

/// Reconstructs an event of a registered kind from its payload.
pub type Decoder<E> = fn(Value) -> Result<E, serde_json::Error>;

#[derive(Debug)]
struct Registration<E> {
    type_key: &'static str,
    decoder: Decoder<E>,
}

/// Immutable registry built once at startup.
///
/// The snapshot pseudo-type is always present under [`SNAPSHOT_EVENT_TYPE`].
#[derive(Debug)]
pub struct EventTypeRegistry<E> {
    by_name: HashMap<String, Registration<E>>,
    by_type: HashMap<&'static str, String>,
}

impl<E: DomainEvent> EventTypeRegistry<E> {
    /// Starts a new registry configuration.
    #[must_use]
    pub fn builder() -> EventTypeRegistryBuilder<E> {
        EventTypeRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Returns the public name of an in-process event type.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownType` if the type was never registered.
    pub fn encode(&self, type_key: &str) -> Result<&str, RegistryError> {
        self.by_type
            .get(type_key)
            .map(String::as_str)
            .ok_or_else(|| RegistryError::UnknownType(type_key.to_owned()))
    }

    /// Returns the in-process type registered under a public name.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownName` if the name was never registered.
    pub fn decode(&self, name: &str) -> Result<&'static str, RegistryError> {
        if name == SNAPSHOT_EVENT_TYPE {
            return Ok(Snapshot::TYPE_KEY);
        }
        self.by_name
            .get(name)
            .map(|registration| registration.type_key)
            .ok_or_else(|| RegistryError::UnknownName(name.to_owned()))
    }

    /// Whether a public name denotes a snapshot entry.
    #[must_use]
    pub fn is_snapshot(&self, name: &str) -> bool {
        name == SNAPSHOT_EVENT_TYPE
    }

    /// Returns the public name and the payload `event` is stored under.
    ///
    /// Accepts any event kind so snapshot entries encode through the same
    /// registry as domain events.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownType` if the kind was never registered
    /// and `RegistryError::Encode` if its payload cannot be serialized.
    pub fn serialize<T: DomainEvent>(&self, event: &T) -> Result<(&str, Value), RegistryError> {
        let type_key = event.event_type();
        let name = self.encode(type_key)?;
        let payload = event
            .serialize()
            .map_err(|source| RegistryError::Encode { type_key, source })?;
        Ok((name, payload))
    }

    /// Rebuilds the event stored under `name` from its payload.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownName` for unregistered names (including
    /// the snapshot name, which never decodes to a domain event) and
    /// `RegistryError::Decode` if the payload does not fit the type.
    pub fn deserialize(&self, name: &str, payload: Value) -> Result<E, RegistryError> {
        let registration = self
            .by_name
            .get(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_owned()))?;
        (registration.decoder)(payload).map_err(|source| RegistryError::Decode {
            name: name.to_owned(),
            source,
        })
    }
}

/// Collects registrations and checks that the mapping is injective.
#[derive(Debug)]
pub struct EventTypeRegistryBuilder<E> {
    entries: Vec<(String, &'static str, Decoder<E>)>,
}

impl<E: DomainEvent> EventTypeRegistryBuilder<E> {
    /// Maps `name` to the in-process `type_key`, decoded with `decoder`.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        type_key: &'static str,
        decoder: Decoder<E>,
    ) -> Self {
        self.entries.push((name.into(), type_key, decoder));
        self
    }

    /// Freezes the configuration.
    ///
    /// # Errors
    ///
    /// Fails if a name or type appears twice, or if a caller tries to claim
    /// the reserved snapshot name or type.
    pub fn build(self) -> Result<EventTypeRegistry<E>, RegistryError> {
        let mut by_name = HashMap::with_capacity(self.entries.len());
        let mut by_type = HashMap::with_capacity(self.entries.len() + 1);
        by_type.insert(Snapshot::TYPE_KEY, SNAPSHOT_EVENT_TYPE.to_owned());

        for (name, type_key, decoder) in self.entries {
            if name == SNAPSHOT_EVENT_TYPE {
                return Err(RegistryError::ReservedName(name));
            }
            if by_type.contains_key(type_key) {
                return Err(RegistryError::DuplicateType(type_key.to_owned()));
            }
            if by_name.contains_key(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            by_type.insert(type_key, name.clone());
            by_name.insert(name, Registration { type_key, decoder });
        }

        Ok(EventTypeRegistry { by_name, by_type })
    }
}
