//! Eventide Core: event-sourced aggregates and the event store contract.
//!
//! Aggregates are rebuilt by replaying an append-only stream of events and
//! record new events that a store appends under optimistic concurrency.
//! This crate contains no database code; backends live in their own crates.

pub mod aggregate;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod id;
pub mod memory;
pub mod registry;
pub mod store;
pub mod stored;

#[cfg(test)]
mod testing;

