//! Persistence layer: data-access traits and their implementations.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::InMemoryStore;
pub use traits::{
    CommonsStore, JobStore, ParticipantListing, SaveOutcome, UnreadableParticipant,
};
