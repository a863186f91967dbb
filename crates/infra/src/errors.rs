//! Conversions from external infrastructure errors into domain errors.

use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

use tillsync_domain::TillsyncError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub TillsyncError);

impl From<InfraError> for TillsyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<TillsyncError> for InfraError {
    fn from(value: TillsyncError) -> Self {
        InfraError(value)
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        let mapped = match value {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        TillsyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        TillsyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        TillsyncError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        TillsyncError::Database("foreign key constraint violation".into())
                    }
                    _ => TillsyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => {
                TillsyncError::NotFound("no rows returned by query".into())
            }
            RE::FromSqlConversionFailure(_, _, cause) => {
                TillsyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                TillsyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => {
                TillsyncError::Database("invalid UTF-8 returned from sqlite".into())
            }
            RE::InvalidQuery => TillsyncError::Database("invalid SQL query".into()),
            other => TillsyncError::Database(other.to_string()),
        };
        InfraError(mapped)
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(TillsyncError::Database(format!("connection pool error: {value}")))
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        if value.is_timeout() {
            return InfraError(TillsyncError::Network("HTTP request timed out".into()));
        }
        if value.is_connect() {
            return InfraError(TillsyncError::Network("HTTP connection failure".into()));
        }

        if let Some(status) = value.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
            let mapped = match code {
                404 => TillsyncError::NotFound(message),
                429 => TillsyncError::Network(message),
                400..=499 => TillsyncError::InvalidInput(message),
                _ => TillsyncError::Network(message),
            };
            return InfraError(mapped);
        }

        InfraError(TillsyncError::Network(value.to_string()))
    }
}

/// A panicked or cancelled blocking task is an internal fault, not a
/// database error.
pub fn map_join_error(err: JoinError) -> TillsyncError {
    if err.is_cancelled() {
        TillsyncError::Internal("blocking task cancelled".into())
    } else {
        TillsyncError::Internal(format!("blocking task panic: {err}"))
    }
}
