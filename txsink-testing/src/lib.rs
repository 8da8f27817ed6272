//! Testing utilities for the transactional sink.

/// In-memory transactional broker for testing.
pub mod memorybroker;
