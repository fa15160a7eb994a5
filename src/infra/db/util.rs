use crate::application::repos::SourceError;

pub fn map_sqlx_error(err: sqlx::Error) -> SourceError {
    match err {
        sqlx::Error::PoolTimedOut => SourceError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) => SourceError::unavailable(err.to_string()),
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout")
                || db
                    .message()
                    .contains("canceling statement due to user request") =>
        {
            SourceError::Timeout
        }
        sqlx::Error::Database(db) if db.message().contains("invalid input syntax") => {
            SourceError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        other => SourceError::from_persistence(other),
    }
}
