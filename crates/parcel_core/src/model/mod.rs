//! Parcel domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//!
//! # Invariants
//! - Every parcel is identified by a storage-assigned `ParcelNumber`.
//! - Deletion is physical; there is no tombstone state.

pub mod parcel;
