//! sea-orm error -> [`TargetError`] classification.

use sea_orm::{DbErr, RuntimeErr};

use crate::error::TargetError;

/// SQLSTATEs meaning the object being created is already there:
/// duplicate_database, duplicate_schema, duplicate_table, duplicate_object,
/// unique_violation (concurrent CREATE on the catalogs).
const DUPLICATE_SQLSTATES: &[&str] = &["42P04", "42P06", "42P07", "42710", "23505"];

fn mentions_sqlstate(msg: &str, code: &str) -> bool {
    msg.contains(&format!("SQLSTATE({code})")) || msg.contains(&format!("code: {code}"))
}

fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Exec(e) | DbErr::Query(e) | DbErr::Conn(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::Database(db_err)) => {
            db_err.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

/// Structured SQLSTATE first, then the code in the message, then the message text.
pub fn classify(err: DbErr) -> TargetError {
    let message = err.to_string();

    if let Some(code) = sqlstate(&err) {
        return if DUPLICATE_SQLSTATES.contains(&code.as_str()) {
            TargetError::already_exists(message)
        } else {
            TargetError::failed(message)
        };
    }

    if DUPLICATE_SQLSTATES
        .iter()
        .any(|code| mentions_sqlstate(&message, code))
    {
        return TargetError::already_exists(message);
    }

    TargetError::from_message(message)
}
