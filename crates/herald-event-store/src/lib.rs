//! Herald event store backends.
//!
//! Two backends satisfy the same `EventStore` contract and run the same
//! conformance suite: an in-memory store for tests and lightweight
//! deployments, and an append-only PostgreSQL table.

pub mod in_memory;
pub mod pg_event_store;
pub mod schema;

pub use in_memory::InMemoryEventStore;
pub use pg_event_store::PgEventStore;
