//! Integration tests for casegate.
//!
//! These tests drive the access manager end to end against the in-memory
//! store: grant mutations, the synchronization they trigger, and the
//! request-time checks that read the resulting cache.
//!
//! Run with:
//! ```bash
//! cargo test --test integration
//! ```

#[path = "integration/test_scenarios.rs"]
mod test_scenarios;

#[path = "integration/test_properties.rs"]
mod test_properties;

#[path = "integration/test_snapshot.rs"]
mod test_snapshot;
