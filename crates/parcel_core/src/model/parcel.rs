//! Parcel domain model.
//!
//! # Responsibility
//! - Define the canonical parcel record persisted in the `parcel` table.
//! - Model the lifecycle status with one distinguished gating state.
//!
//! # Invariants
//! - `number` is assigned by storage and never reused for another parcel.
//! - `created_at` is set once at creation and never mutated.
//! - Address change and deletion are only legal while status is `registered`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Storage-assigned surrogate key of a parcel.
pub type ParcelNumber = i64;

/// Opaque owner identifier. Not validated against any other entity.
pub type ClientId = i64;

/// Status tag without a dedicated `ParcelStatus` variant.
///
/// Only built through `ParcelStatus::from`, so it never holds a known tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomStatus(String);

impl CustomStatus {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parcel lifecycle status.
///
/// Known tags map to dedicated variants; any other string coming from
/// callers or storage is preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParcelStatus {
    /// Accepted but not yet handed to a carrier. The only mutable state.
    Registered,
    /// Handed over for delivery.
    Sent,
    /// Received by the client.
    Delivered,
    /// Any status tag without a dedicated variant.
    Other(CustomStatus),
}

impl ParcelStatus {
    pub const REGISTERED: &'static str = "registered";
    pub const SENT: &'static str = "sent";
    pub const DELIVERED: &'static str = "delivered";

    /// Returns the storage tag for this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registered => Self::REGISTERED,
            Self::Sent => Self::SENT,
            Self::Delivered => Self::DELIVERED,
            Self::Other(custom) => custom.as_str(),
        }
    }

    /// Returns whether address change and deletion are allowed.
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered)
    }

    /// Returns the next state on the standard delivery path.
    ///
    /// `delivered` and unknown tags have no successor.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Registered => Some(Self::Sent),
            Self::Sent => Some(Self::Delivered),
            Self::Delivered | Self::Other(_) => None,
        }
    }
}

impl From<&str> for ParcelStatus {
    fn from(value: &str) -> Self {
        match value {
            Self::REGISTERED => Self::Registered,
            Self::SENT => Self::Sent,
            Self::DELIVERED => Self::Delivered,
            other => Self::Other(CustomStatus(other.to_string())),
        }
    }
}

impl From<String> for ParcelStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::REGISTERED => Self::Registered,
            Self::SENT => Self::Sent,
            Self::DELIVERED => Self::Delivered,
            _ => Self::Other(CustomStatus(value)),
        }
    }
}

impl From<ParcelStatus> for String {
    fn from(value: ParcelStatus) -> Self {
        match value {
            ParcelStatus::Other(custom) => custom.0,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for ParcelStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical parcel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    /// Storage-assigned key. `0` until the parcel has been added.
    pub number: ParcelNumber,
    pub client: ClientId,
    pub status: ParcelStatus,
    /// Delivery address.
    pub address: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

impl Parcel {
    /// Creates an unsaved parcel with caller-provided fields.
    ///
    /// No content validation is applied to `status` or `address`.
    pub fn new(
        client: ClientId,
        status: impl Into<ParcelStatus>,
        address: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            number: 0,
            client,
            status: status.into(),
            address: address.into(),
            created_at: created_at.into(),
        }
    }

    /// Creates an unsaved `registered` parcel stamped with the current UTC time.
    pub fn register(client: ClientId, address: impl Into<String>) -> Self {
        Self::new(
            client,
            ParcelStatus::Registered,
            address,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Returns whether the status gate currently allows mutation.
    pub fn is_registered(&self) -> bool {
        self.status.is_registered()
    }
}

#[cfg(test)]
mod tests {
    use super::{Parcel, ParcelStatus};
    use chrono::DateTime;

    #[test]
    fn known_tags_map_to_variants() {
        assert_eq!(ParcelStatus::from("registered"), ParcelStatus::Registered);
        assert_eq!(ParcelStatus::from("sent"), ParcelStatus::Sent);
        assert_eq!(
            ParcelStatus::from("delivered".to_string()),
            ParcelStatus::Delivered
        );
    }

    #[test]
    fn unknown_tags_are_preserved_verbatim() {
        let status = ParcelStatus::from("Delivered");
        assert!(matches!(
            &status,
            ParcelStatus::Other(custom) if custom.as_str() == "Delivered"
        ));
        assert_ne!(status, ParcelStatus::Delivered);
        assert_eq!(status.as_str(), "Delivered");
        assert!(!status.is_registered());
        assert_eq!(String::from(status), "Delivered");
    }

    #[test]
    fn known_tag_never_becomes_custom() {
        for tag in ["registered", "sent", "delivered"] {
            let status = ParcelStatus::from(tag.to_string());
            assert!(
                !matches!(status, ParcelStatus::Other(_)),
                "{tag} must map to a variant"
            );
            assert_eq!(ParcelStatus::from(String::from(status.clone())), status);
        }
        let registered = ParcelStatus::from("registered");
        assert!(registered.is_registered());
        assert!(Parcel::new(1, registered, "a", "2024-01-01T00:00:00Z").is_registered());
    }

    #[test]
    fn lifecycle_stops_at_delivered() {
        assert_eq!(ParcelStatus::Registered.next(), Some(ParcelStatus::Sent));
        assert_eq!(ParcelStatus::Sent.next(), Some(ParcelStatus::Delivered));
        assert_eq!(ParcelStatus::Delivered.next(), None);
        assert_eq!(ParcelStatus::from("lost").next(), None);
    }

    #[test]
    fn register_stamps_rfc3339_time() {
        let parcel = Parcel::register(7, "main street 1");
        assert_eq!(parcel.number, 0);
        assert_eq!(parcel.client, 7);
        assert!(parcel.is_registered());
        assert!(DateTime::parse_from_rfc3339(&parcel.created_at).is_ok());
    }
}
