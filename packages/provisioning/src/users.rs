use tracing::info;

use crate::error::{ProvisionError, Step};
use crate::model::UserSpec;
use crate::target::UserTarget;

/// How an existing user with the same name is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserMode {
    /// Create; an existing user is left untouched.
    #[default]
    CreateOnly,
    /// Upsert keyed on username; an existing user gets the new secret and grants.
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Created,
    AlreadyExists,
    Upserted,
}

/// Ensures `user` exists. "Already exists" is a successful no-op in
/// `CreateOnly` mode; every other failure is fatal.
pub async fn ensure_user<T>(
    conn: &T,
    user: &UserSpec,
    mode: UserMode,
) -> Result<UserOutcome, ProvisionError>
where
    T: UserTarget + ?Sized,
{
    let step = || Step::User {
        username: user.username.clone(),
    };

    match mode {
        UserMode::CreateOnly => match conn.create_user(user).await {
            Ok(()) => {
                info!(user = %user.username, roles = user.roles().len(), "Created user");
                Ok(UserOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                info!(user = %user.username, "User already exists");
                Ok(UserOutcome::AlreadyExists)
            }
            Err(e) => Err(ProvisionError::at(step(), e)),
        },
        UserMode::Upsert => {
            conn.upsert_user(user)
                .await
                .map_err(|e| ProvisionError::at(step(), e))?;
            info!(user = %user.username, "Upserted user");
            Ok(UserOutcome::Upserted)
        }
    }
}
