//! Shared persistent state and merge rules for Tandem lobbies.
//!
//! Persistent state (the save-progress buffer and the star counter) must
//! converge identically on every participant and on the relay even though
//! updates are delivered best-effort, possibly reordered or duplicated.
//! Convergence comes entirely from the merge rules in [`merge`]: byte-wise
//! OR for the buffer and maximum for the counter.
//!
//! # Modules
//!
//! - [`merge`] -- The commutative, idempotent, monotone merge functions.
//! - [`store`] -- [`SharedStore`], one per participant connection.
//! - [`lobby`] -- [`LobbyStore`], one per lobby on the relay, adding
//!   participant scene records and retained persistent packets.
//!
//! # Usage
//!
//! ```
//! use tandem_store::{SharedStore, StarReconcile};
//!
//! let mut store = SharedStore::new();
//! assert!(store.raise_star_count(5));
//! assert!(!store.raise_star_count(3));
//! assert_eq!(store.reconcile_star_count(2), StarReconcile::Lowered(5));
//! ```

pub mod lobby;
pub mod merge;
pub mod store;

// Re-export primary types at crate root.
pub use lobby::LobbyStore;
pub use merge::{absorb_save_buffer, merge_save_buffer, merge_star_count};
pub use store::{SharedStore, StarReconcile};
