use serde_json::json;

/// Why the authorization gate said no. Carried to the caller so the UI can
/// show a precise message instead of a generic "forbidden".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotOwner,
    RoleForbidden,
    Unauthenticated,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NotOwner => "notOwner",
            DenyReason::RoleForbidden => "roleForbidden",
            DenyReason::Unauthenticated => "unauthenticated",
        }
    }
}

/// Operation-level error taxonomy. Everything the store/repo/engine layers can
/// fail with maps to one of these; the IPC layer turns them into the wire
/// `{code, message, details}` envelope.
#[derive(Debug)]
pub enum OpError {
    /// A directly referenced entity does not exist.
    NotFound { what: &'static str, id: String },
    /// A fan-out referent went missing mid-operation; the whole unit aborts.
    Reference { message: String },
    /// Malformed input or document shape.
    Validation { message: String },
    /// Uniqueness violation on a key the caller asked to create fresh.
    Conflict { message: String },
    /// The authorization gate rejected the operation.
    Denied { reason: DenyReason, message: String },
    /// Store timeout / write conflict; safe to retry.
    Transient { message: String },
    /// Any other store failure.
    Store { message: String },
}

impl OpError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        OpError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn reference(message: impl Into<String>) -> Self {
        OpError::Reference {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        OpError::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        OpError::Conflict {
            message: message.into(),
        }
    }

    pub fn denied(reason: DenyReason, message: impl Into<String>) -> Self {
        OpError::Denied {
            reason,
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        OpError::Store {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OpError::NotFound { .. } => "not_found",
            OpError::Reference { .. } => "reference_error",
            OpError::Validation { .. } => "validation_error",
            OpError::Conflict { .. } => "conflict",
            OpError::Denied { .. } => "authorization_denied",
            OpError::Transient { .. } => "transient_store_error",
            OpError::Store { .. } => "store_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            OpError::NotFound { what, id } => format!("{} not found: {}", what, id),
            OpError::Reference { message }
            | OpError::Validation { message }
            | OpError::Conflict { message }
            | OpError::Transient { message }
            | OpError::Store { message } => message.clone(),
            OpError::Denied { message, .. } => message.clone(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            OpError::NotFound { what, id } => Some(json!({ "collection": what, "id": id })),
            OpError::Denied { reason, .. } => Some(json!({ "reason": reason.as_str() })),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for OpError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode::{DatabaseBusy, DatabaseLocked};
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(f.code, DatabaseBusy | DatabaseLocked) =>
            {
                OpError::Transient {
                    message: e.to_string(),
                }
            }
            _ => OpError::Store {
                message: e.to_string(),
            },
        }
    }
}
