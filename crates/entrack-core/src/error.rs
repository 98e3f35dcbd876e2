use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Every failure surfaced by the tracker is one of these; nothing is retried
/// or swallowed internally.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without a detail payload.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    // Build an error whose message is the rendered tracking detail.
    fn from_tracking(class: ErrorClass, origin: ErrorOrigin, detail: TrackingError) -> Self {
        Self {
            class,
            origin,
            message: detail.to_string(),
            detail: Some(ErrorDetail::Tracking(detail)),
        }
    }

    /// Construct a tracking-origin invariant violation.
    pub(crate) fn tracking_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Tracking,
            message.into(),
        )
    }

    /// Construct a sidecar-origin invariant violation.
    pub(crate) fn sidecar_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Sidecar,
            message.into(),
        )
    }

    /// Construct a key-origin invariant violation.
    pub(crate) fn key_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Key, message.into())
    }

    /// Construct a generation-origin internal error.
    pub(crate) fn generation_internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::Internal,
            ErrorOrigin::Generation,
            message.into(),
        )
    }

    /// Construct a save-origin internal error (collaborator failure).
    pub fn save_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Save, message.into())
    }

    /// Construct an interface-origin error for native objects that reject a
    /// value (wrong kind, failed conversion).
    pub fn interface(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Interface, message.into())
    }

    /// Construct a not-found error for an unknown entity type.
    pub(crate) fn unknown_entity_type(name: &str) -> Self {
        Self::new(
            ErrorClass::NotFound,
            ErrorOrigin::Model,
            format!("unknown entity type: '{name}'"),
        )
    }

    /// Key already owned by a different tracked entry.
    pub(crate) fn identity_conflict(entity: &str, key: impl Into<String>) -> Self {
        Self::from_tracking(
            ErrorClass::Conflict,
            ErrorOrigin::Tracking,
            TrackingError::IdentityConflict {
                entity: entity.to_string(),
                key: key.into(),
            },
        )
    }

    /// Native object already owned by a different tracked entry.
    pub(crate) fn reference_conflict(entity: &str) -> Self {
        Self::from_tracking(
            ErrorClass::Conflict,
            ErrorOrigin::Tracking,
            TrackingError::ReferenceConflict {
                entity: entity.to_string(),
            },
        )
    }

    /// Property name or index the entity shape does not define.
    pub(crate) fn unknown_property(entity: &str, property: impl Into<String>) -> Self {
        Self::from_tracking(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Tracking,
            TrackingError::UnknownProperty {
                entity: entity.to_string(),
                property: property.into(),
            },
        )
    }

    /// Property that cannot be written or marked modified.
    pub(crate) fn read_only_property(entity: &str, property: &str) -> Self {
        Self::from_tracking(
            ErrorClass::Unsupported,
            ErrorOrigin::Tracking,
            TrackingError::ReadOnlyProperty {
                entity: entity.to_string(),
                property: property.to_string(),
            },
        )
    }

    /// Value generation requested for a multi-property key.
    pub(crate) fn composite_key_generation(entity: &str) -> Self {
        Self::from_tracking(
            ErrorClass::Unsupported,
            ErrorOrigin::Generation,
            TrackingError::CompositeKeyGeneration {
                entity: entity.to_string(),
            },
        )
    }

    /// Handle whose slot was released or reused.
    pub(crate) fn stale_entry(index: u32, generation: u32) -> Self {
        Self::from_tracking(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Tracking,
            TrackingError::StaleEntry { index, generation },
        )
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.class, ErrorClass::Conflict)
    }

    #[must_use]
    pub const fn tracking_detail(&self) -> Option<&TrackingError> {
        match &self.detail {
            Some(ErrorDetail::Tracking(detail)) => Some(detail),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Tracking(TrackingError),
}

///
/// TrackingError
///
/// Tracker-specific structured error detail.
/// Never returned directly; always wrapped in [`ErrorDetail::Tracking`].
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TrackingError {
    #[error("identity conflict: another '{entity}' entry is already tracked with key {key}")]
    IdentityConflict { entity: String, key: String },

    #[error("identity conflict: this '{entity}' object is already tracked by another entry")]
    ReferenceConflict { entity: String },

    #[error("bad property name: '{property}' is not defined on '{entity}'")]
    UnknownProperty { entity: String, property: String },

    #[error("property '{property}' on '{entity}' is read-only")]
    ReadOnlyProperty { entity: String, property: String },

    #[error("value generation for the composite primary key of '{entity}' is not implemented")]
    CompositeKeyGeneration { entity: String },

    #[error("entry handle {index}:{generation} is stale")]
    StaleEntry { index: u32, generation: u32 },
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    NotFound,
    Internal,
    Conflict,
    Unsupported,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Model,
    Tracking,
    Key,
    Sidecar,
    Generation,
    Save,
    Interface,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Model => "model",
            Self::Tracking => "tracking",
            Self::Key => "key",
            Self::Sidecar => "sidecar",
            Self::Generation => "generation",
            Self::Save => "save",
            Self::Interface => "interface",
        };
        write!(f, "{label}")
    }
}

///
/// TESTS
///
