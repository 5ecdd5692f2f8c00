use sea_orm::error::DbErr;
use uuid::Uuid;

/// Unified error type for every service operation in the crate.
///
/// Business-rule violations are terminal for the request that raised them:
/// the enclosing database transaction has been rolled back and nothing was
/// applied, so retrying the same call is never appropriate. The only variant
/// worth retrying is [`ServiceError::StorageUnavailable`], which signals a
/// store-level failure rather than a rejected request.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A non-positive quantity was supplied where a positive one is required,
    /// or an adjustment delta of zero.
    #[error("invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i32 },

    /// A removal or transfer asked for more stock than the record can give up.
    #[error("insufficient stock on record {record_id}: requested {requested}, available {available}")]
    InsufficientStock {
        record_id: Uuid,
        requested: i32,
        available: i32,
    },

    /// A reservation asked for more than the unreserved quantity.
    #[error("insufficient available stock on record {record_id}: requested {requested}, available {available}")]
    InsufficientAvailableStock {
        record_id: Uuid,
        requested: i32,
        available: i32,
    },

    /// An adjustment would leave the record with negative stock or with more
    /// reserved than on hand.
    #[error("invalid adjustment of {delta} on record {record_id}: quantity {quantity}, reserved {reserved_quantity}")]
    InvalidAdjustment {
        record_id: Uuid,
        delta: i32,
        quantity: i32,
        reserved_quantity: i32,
    },

    /// The underlying store could not complete the transaction. Transient;
    /// callers may retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] DbErr),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    /// A purchase order was asked to make a transition its current status
    /// does not permit.
    #[error("purchase order {po_id} is {status}, expected {expected}")]
    InvalidStatus {
        po_id: Uuid,
        status: String,
        expected: String,
    },
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a database error, normalizing string messages into `DbErr`.
    pub fn db_error(error: impl Into<DbErr>) -> Self {
        ServiceError::StorageUnavailable(error.into())
    }

    /// Whether a caller may reasonably retry the failed call as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_are_retryable() {
        let err = ServiceError::InsufficientStock {
            record_id: Uuid::new_v4(),
            requested: 10,
            available: 3,
        };
        assert!(!err.is_retryable());
        assert!(ServiceError::StorageUnavailable(DbErr::Custom("down".into())).is_retryable());
    }

    #[test]
    fn messages_carry_request_context() {
        let id = Uuid::new_v4();
        let err = ServiceError::InsufficientAvailableStock {
            record_id: id,
            requested: 50,
            available: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("50"));
        assert!(msg.contains("20"));
    }
}
