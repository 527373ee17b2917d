//! Single-writer session layer over `rules-core`.
//!
//! Each character's ledger is owned by exactly one worker task; all purchase
//! operations against it are serialized through a command channel, so
//! eligibility, cost, and slot resolution always observe a consistent
//! snapshot and a currency can never be double-spent by interleaved writers.
//! The definition model is shared read-only across every session via
//! [`std::sync::Arc`].
mod error;
mod handle;
mod registry;
mod worker;

pub use error::SessionError;
pub use handle::CharacterHandle;
pub use registry::{CharacterId, SessionRegistry};
