//! Parcel use-case service.
//!
//! # Responsibility
//! - Register parcels and move them along the delivery lifecycle.
//! - Delegate persistence and the status gate to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository persistence contracts.
//! - Service layer remains storage-agnostic.

use crate::model::parcel::{ClientId, Parcel, ParcelNumber, ParcelStatus};
use crate::repo::parcel_repo::{ParcelRepository, RepoError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for parcel use-cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Persistence-layer failure, including status gate rejections.
    Repo(RepoError),
    /// Parcel status has no successor on the delivery path.
    NoNextStatus {
        number: ParcelNumber,
        status: ParcelStatus,
    },
}

impl ServiceError {
    /// Returns the repository error when this failure came from storage.
    pub fn as_repo(&self) -> Option<&RepoError> {
        match self {
            Self::Repo(err) => Some(err),
            Self::NoNextStatus { .. } => None,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::NoNextStatus { number, status } => write!(
                f,
                "parcel with number {number} has no status after `{status}`"
            ),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::NoNextStatus { .. } => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Use-case service wrapper for parcel operations.
pub struct ParcelService<R: ParcelRepository> {
    repo: R,
}

impl<R: ParcelRepository> ParcelService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Registers a new parcel for `client` and returns the stored record.
    ///
    /// # Contract
    /// - Status is `registered`.
    /// - `created_at` is the current UTC time in RFC3339.
    /// - Returned `number` is the storage-assigned key.
    pub fn register(
        &self,
        client: ClientId,
        address: impl Into<String>,
    ) -> ServiceResult<Parcel> {
        let mut parcel = Parcel::register(client, address);
        parcel.number = self.repo.add(&parcel)?;
        info!(
            "event=parcel_register module=service status=ok number={} client={}",
            parcel.number, client
        );
        Ok(parcel)
    }

    /// Gets one parcel by number.
    pub fn parcel(&self, number: ParcelNumber) -> ServiceResult<Parcel> {
        Ok(self.repo.get(number)?)
    }

    /// Lists every parcel of a client. Order is not guaranteed.
    pub fn client_parcels(&self, client: ClientId) -> ServiceResult<Vec<Parcel>> {
        Ok(self.repo.get_by_client(client)?)
    }

    /// Advances a parcel one step on `registered -> sent -> delivered`.
    ///
    /// Returns the new status. The write only applies while the stored status
    /// is still the one read here; otherwise `RepoError::StatusChanged`.
    pub fn next_status(&self, number: ParcelNumber) -> ServiceResult<ParcelStatus> {
        let parcel = self.repo.get(number)?;
        let next = parcel
            .status
            .next()
            .ok_or_else(|| ServiceError::NoNextStatus {
                number,
                status: parcel.status.clone(),
            })?;

        self.repo.replace_status(number, &parcel.status, &next)?;
        info!(
            "event=parcel_next_status module=service status=ok number={} from={} to={}",
            number, parcel.status, next
        );
        Ok(next)
    }

    /// Overwrites the status with an arbitrary tag.
    pub fn set_status(
        &self,
        number: ParcelNumber,
        status: impl Into<ParcelStatus>,
    ) -> ServiceResult<()> {
        Ok(self.repo.set_status(number, &status.into())?)
    }

    /// Changes the delivery address of a `registered` parcel.
    pub fn change_address(&self, number: ParcelNumber, address: &str) -> ServiceResult<()> {
        Ok(self.repo.set_address(number, address)?)
    }

    /// Deletes a `registered` parcel.
    pub fn delete(&self, number: ParcelNumber) -> ServiceResult<()> {
        Ok(self.repo.delete(number)?)
    }
}
