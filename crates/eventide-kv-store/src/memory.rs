//! In-process [`ItemTable`] for tests and local development.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::attribute::{AttributeValue, Item};
use crate::table::{FIELD_EVENT_STREAM, FIELD_EVENT_TYPE, FIELD_VERSION, ItemTable, TableError};

type Key = (String, u64);

/// Items ordered by `(EventStream, Version)`.
#[derive(Debug, Default)]
pub struct InMemoryTable {
    items: Mutex<BTreeMap<Key, Item>>,
}

impl InMemoryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items across all streams.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize, TableError> {
        Ok(self.lock()?.len())
    }

    /// Whether the table holds no items.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, TableError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Key, Item>>, TableError> {
        self.items
            .lock()
            .map_err(|e| TableError::Service(format!("in-memory table poisoned: {e}").into()))
    }
}

fn key_of(item: &Item) -> Result<Key, TableError> {
    let stream = item
        .get(FIELD_EVENT_STREAM)
        .and_then(AttributeValue::as_s)
        .ok_or(TableError::MissingKey(FIELD_EVENT_STREAM))?;
    let version = item
        .get(FIELD_VERSION)
        .and_then(AttributeValue::as_n)
        .and_then(|n| n.parse().ok())
        .ok_or(TableError::MissingKey(FIELD_VERSION))?;
    Ok((stream.to_owned(), version))
}

#[async_trait]
impl ItemTable for InMemoryTable {
    async fn put_item_if_absent(&self, item: Item) -> Result<(), TableError> {
        let key = key_of(&item)?;
        let mut items = self.lock()?;
        if items.contains_key(&key) {
            return Err(TableError::ConditionalCheckFailed);
        }
        items.insert(key, item);
        Ok(())
    }

    async fn query_stream(&self, stream: &str, from_version: u64) -> Result<Vec<Item>, TableError> {
        let items = self.lock()?;
        let start = (stream.to_owned(), from_version);
        Ok(items
            .range(start..)
            .take_while(|((s, _), _)| s == stream)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn query_latest_by_type(
        &self,
        event_type: &str,
        stream: &str,
    ) -> Result<Option<Item>, TableError> {
        let items = self.lock()?;
        let mut by_type: Vec<(&Key, &Item)> = items
            .iter()
            .filter(|(_, item)| {
                item.get(FIELD_EVENT_TYPE).and_then(AttributeValue::as_s) == Some(event_type)
            })
            .collect();
        by_type.sort_by(|(a, _), (b, _)| b.1.cmp(&a.1));

        Ok(by_type
            .into_iter()
            .find(|((s, _), _)| s == stream)
            .map(|(_, item)| item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stream: &str, version: u64, event_type: &str) -> Item {
        Item::from([
            (FIELD_EVENT_STREAM.to_owned(), AttributeValue::S(stream.to_owned())),
            (FIELD_VERSION.to_owned(), AttributeValue::N(version.to_string())),
            (FIELD_EVENT_TYPE.to_owned(), AttributeValue::S(event_type.to_owned())),
        ])
    }

    #[tokio::test]
    async fn test_put_is_rejected_when_key_exists() {
        let table = InMemoryTable::new();
        table.put_item_if_absent(item("a", 1, "x")).await.unwrap();

        let result = table.put_item_if_absent(item("a", 1, "y")).await;

        assert!(matches!(result, Err(TableError::ConditionalCheckFailed)));
        assert_eq!(table.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_without_version_is_rejected() {
        let table = InMemoryTable::new();
        let mut broken = item("a", 1, "x");
        broken.remove(FIELD_VERSION);

        let result = table.put_item_if_absent(broken).await;

        assert!(matches!(result, Err(TableError::MissingKey(FIELD_VERSION))));
    }

    #[tokio::test]
    async fn test_query_stream_is_ascending_and_scoped() {
        // Arrange
        let table = InMemoryTable::new();
        for (stream, version) in [("b", 1), ("a", 3), ("a", 1), ("a", 2), ("c", 1)] {
            table.put_item_if_absent(item(stream, version, "x")).await.unwrap();
        }

        // Act
        let items = table.query_stream("a", 2).await.unwrap();

        // Assert
        let versions: Vec<&str> = items
            .iter()
            .filter_map(|i| i.get(FIELD_VERSION).and_then(AttributeValue::as_n))
            .collect();
        assert_eq!(versions, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_latest_by_type_picks_highest_version_of_stream() {
        let table = InMemoryTable::new();
        table.put_item_if_absent(item("a", 2, "snapshot")).await.unwrap();
        table.put_item_if_absent(item("a", 5, "snapshot")).await.unwrap();
        table.put_item_if_absent(item("a", 6, "x")).await.unwrap();
        table.put_item_if_absent(item("b", 9, "snapshot")).await.unwrap();

        let latest = table.query_latest_by_type("snapshot", "a").await.unwrap();

        assert_eq!(latest.map(|i| key_of(&i).unwrap()), Some(("a".to_owned(), 5)));
        assert!(table.query_latest_by_type("snapshot", "c").await.unwrap().is_none());
    }
}
