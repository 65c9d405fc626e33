//! Who is calling, and what they are allowed to do.
//!
//! A caller is identified by the iroh node id of its connection. Logging in
//! binds that node id to a user in the `session` table; every later request
//! from the same node resolves to a [`Principal`].

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use chrono::{Duration, Utc};
use rand::{distr::Alphanumeric, Rng, RngCore};
use sea_orm::{ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{session, user},
    error::BlogError,
    ids::UserId,
};

const TOKEN_LEN: usize = 64;

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

impl Principal {
    pub fn from_user(user: &user::Model) -> Self {
        Self {
            user_id: user.id,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            is_verified: user.is_verified,
        }
    }

    pub fn require_active(&self) -> Result<(), BlogError> {
        if !self.is_active {
            return Err(BlogError::InactiveUser);
        }
        Ok(())
    }

    pub fn require_superuser(&self) -> Result<(), BlogError> {
        if !self.is_superuser {
            return Err(BlogError::Forbidden("superuser privileges required"));
        }
        Ok(())
    }

    pub fn require_verified(&self) -> Result<(), BlogError> {
        if !self.is_verified {
            return Err(BlogError::Forbidden("email verification required"));
        }
        Ok(())
    }

    /// Authors may change their own rows; superusers may change anything.
    pub fn can_modify(&self, owner: UserId) -> bool {
        self.is_superuser || self.user_id == owner
    }
}

/// Looks up the live session for `node_id` and the user it belongs to.
pub(crate) async fn resolve_principal<C: ConnectionTrait>(
    conn: &C,
    node_id: &str,
) -> Result<Principal, BlogError> {
    let session = session::Entity::find_by_id(node_id.to_owned())
        .one(conn)
        .await?
        .ok_or(BlogError::Unauthenticated)?;

    if session.expires_at <= Utc::now() {
        tracing::debug!(node_id, "session expired");
        return Err(BlogError::Unauthenticated);
    }

    let user = user::Entity::find_by_id(session.user_id)
        .one(conn)
        .await?
        .ok_or(BlogError::Unauthenticated)?;

    let principal = Principal::from_user(&user);
    principal.require_active()?;
    Ok(principal)
}

/// Binds `node_id` to `user_id`, replacing any earlier binding of that node.
pub(crate) async fn bind_session<C: ConnectionTrait>(
    conn: &C,
    node_id: &str,
    user_id: UserId,
    ttl_minutes: i64,
) -> Result<session::Model, BlogError> {
    end_session(conn, node_id).await?;

    let now = Utc::now();
    let session = session::ActiveModel {
        node_id: Set(node_id.to_owned()),
        user_id: Set(user_id),
        created_at: Set(now),
        expires_at: Set(now + Duration::minutes(ttl_minutes)),
    };
    Ok(session::Entity::insert(session)
        .exec_with_returning(conn)
        .await?)
}

pub(crate) async fn end_session<C: ConnectionTrait>(
    conn: &C,
    node_id: &str,
) -> Result<(), BlogError> {
    session::Entity::delete_by_id(node_id.to_owned())
        .exec(conn)
        .await?;
    Ok(())
}

pub(crate) async fn end_user_sessions<C: ConnectionTrait>(
    conn: &C,
    user_id: UserId,
) -> Result<(), BlogError> {
    session::Entity::delete_many()
        .filter(session::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Random token used for email verification and password resets.
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Password hashing as seen by the services.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, BlogError>;

    /// `Ok(false)` on mismatch; `Err` only when `hash` is not a valid PHC string.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, BlogError>;
}

/// Argon2id with a random 16 byte salt, stored as a PHC string.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Custom cost parameters. Cheap settings keep the test suite fast.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, BlogError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| BlogError::PasswordHash(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, BlogError> {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| BlogError::PasswordHash(e.to_string()))?;

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| BlogError::PasswordHash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, BlogError> {
        let parsed = PasswordHash::new(hash).map_err(|e| BlogError::PasswordHash(e.to_string()))?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn test_hash_then_verify() {
        let hasher = test_utils::fast_hasher();
        let hash = hasher.hash("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).unwrap());
        assert!(!hasher.verify("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_same_password_gets_different_salts() {
        let hasher = test_utils::fast_hasher();
        assert_ne!(hasher.hash("pw").unwrap(), hasher.hash("pw").unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let hasher = test_utils::fast_hasher();
        assert!(matches!(
            hasher.verify("pw", "not-a-phc-string"),
            Err(BlogError::PasswordHash(_))
        ));
    }

    #[test]
    fn test_tokens_are_long_and_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_principal_gates() {
        let reader = Principal {
            user_id: UserId::new(),
            is_active: true,
            is_superuser: false,
            is_verified: false,
        };
        assert!(reader.require_active().is_ok());
        assert!(matches!(reader.require_superuser(), Err(BlogError::Forbidden(_))));
        assert!(matches!(reader.require_verified(), Err(BlogError::Forbidden(_))));
        assert!(reader.can_modify(reader.user_id));
        assert!(!reader.can_modify(UserId::new()));

        let admin = Principal {
            is_superuser: true,
            ..reader
        };
        assert!(admin.can_modify(UserId::new()));
    }

    #[tokio::test]
    async fn test_session_resolves_until_it_expires() {
        let db = test_utils::setup_db().await;
        let user = test_utils::insert_user(&db, "ada", false, true).await;

        assert!(matches!(
            resolve_principal(&db, "node-a").await,
            Err(BlogError::Unauthenticated)
        ));

        bind_session(&db, "node-a", user.id, 30).await.unwrap();
        let principal = resolve_principal(&db, "node-a").await.unwrap();
        assert_eq!(principal.user_id, user.id);
        assert!(principal.is_verified);

        // A negative lifetime yields a session that is already expired.
        bind_session(&db, "node-a", user.id, -1).await.unwrap();
        assert!(matches!(
            resolve_principal(&db, "node-a").await,
            Err(BlogError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_inactive_user_is_rejected() {
        let db = test_utils::setup_db().await;
        let user = test_utils::insert_user(&db, "grace", false, true).await;
        test_utils::deactivate_user(&db, user.id).await;

        bind_session(&db, "node-g", user.id, 30).await.unwrap();
        assert!(matches!(
            resolve_principal(&db, "node-g").await,
            Err(BlogError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn test_logout_removes_binding() {
        let db = test_utils::setup_db().await;
        let user = test_utils::insert_user(&db, "linus", false, false).await;

        bind_session(&db, "node-l", user.id, 30).await.unwrap();
        end_session(&db, "node-l").await.unwrap();

        assert!(matches!(
            resolve_principal(&db, "node-l").await,
            Err(BlogError::Unauthenticated)
        ));
    }
}
