//! shelfsync: offline-first inventory mutation core.
//!
//! A device running shelfsync keeps working while disconnected from its
//! server of record. User actions land in persistent mutation queues
//! (stock transactions, item creates/edits/archives, image uploads); an
//! external upload loop drains them in FIFO order using per-record
//! idempotency keys, and [`reconcile::apply_pending_operations`] merges the
//! latest server snapshot with whatever is still queued into one consistent
//! view for display.
//!
//! The crate owns local state only. Network transport, retry scheduling,
//! and conflict resolution policy live outside; the core defines the status
//! transitions the upload loop must perform and carries each mutation's
//! `expected_version` faithfully so the server can detect conflicts.

pub mod backup;
pub mod db;
pub mod images;
pub mod item_mutations;
pub mod metadata;
pub mod reconcile;
pub mod transactions;
