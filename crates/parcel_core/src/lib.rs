//! Core domain logic for the parcel tracker.
//! This crate is the single source of truth for parcel business invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::parcel::{ClientId, CustomStatus, Parcel, ParcelNumber, ParcelStatus};
pub use repo::parcel_repo::{
    ParcelOp, ParcelRepository, RepoError, RepoKey, RepoResult, SqliteParcelStore,
};
pub use service::parcel_service::{ParcelService, ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
