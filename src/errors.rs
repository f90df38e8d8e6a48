use sea_orm::error::{DbErr, SqlErr};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Ledger state that the invariants say cannot exist, e.g. two open movements for one tool.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Identity provider error: {0}")]
    IdentityError(String),

    /// The first write of a two-step operation committed and the second did not.
    #[error("Partial update for {subject}: {completed} was written but {failed} failed: {source}")]
    PartialUpdate {
        subject: Uuid,
        completed: String,
        failed: &'static str,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Maps a failed write, turning unique-constraint violations into `Conflict`.
    pub fn from_write(error: DbErr, what: impl Into<String>) -> Self {
        match error.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                ServiceError::Conflict(format!("{}: {}", what.into(), detail))
            }
            _ => ServiceError::DatabaseError(error),
        }
    }

    pub fn partial(
        subject: Uuid,
        completed: impl Into<String>,
        failed: &'static str,
        source: ServiceError,
    ) -> Self {
        ServiceError::PartialUpdate {
            subject,
            completed: completed.into(),
            failed,
            source: Box::new(source),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "upstream",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation",
            Self::Consistency(_) => "consistency",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::IdentityError(_) => "identity",
            Self::PartialUpdate { .. } => "partial_update",
            Self::EventError(_) => "event",
            Self::InternalError(_) => "internal",
        }
    }

    /// Only connection-level store failures are worth retrying, and retrying is the caller's call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
        )
    }

    /// Exit code used by the command line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ValidationError(_) | Self::InvalidOperation(_) => 2,
            Self::NotFound(_) => 3,
            Self::Conflict(_) => 4,
            Self::Forbidden(_) | Self::IdentityError(_) => 5,
            Self::Consistency(_) | Self::PartialUpdate { .. } => 6,
            _ => 1,
        }
    }
}
