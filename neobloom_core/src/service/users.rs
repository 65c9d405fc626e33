use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait, Value,
};
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    auth::{self, PasswordHasher, Principal},
    config::{AuthSettings, ContentSettings},
    entity::{comment, post, user},
    error::{BlogError, Resource},
    ids::UserId,
    integrity,
    service::{caller, comments, node_id, posts, Page},
};

const DEFAULT_PAGE_SIZE: u64 = 100;

/// A user's own account, as returned to that user or to a superuser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub login_count: i32,
}

impl From<user::Model> for UserView {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            bio: user.bio,
            avatar_url: user.avatar_url,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            is_verified: user.is_verified,
            created_at: user.created_at,
            last_login: user.last_login,
            login_count: user.login_count,
        }
    }
}

/// What anyone may see about a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserProfile {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            full_name: user.full_name,
            bio: user.bio,
            avatar_url: user.avatar_url,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Fields a user may change on their own account. `None` leaves a field as is.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// Superuser changes to any account.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AccountChanges {
    pub profile: ProfileChanges,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_verified: Option<bool>,
}

#[derive(Clone)]
pub struct UsersService {
    db: DatabaseConnection,
    auth: AuthSettings,
    content: ContentSettings,
    hasher: Arc<dyn PasswordHasher>,
}

impl UsersService {
    pub fn new(
        db: DatabaseConnection,
        auth: AuthSettings,
        content: ContentSettings,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            db,
            auth,
            content,
            hasher,
        }
    }

    /// Create an unverified account. The verification token stays on the row
    /// until `verify_email` consumes it.
    pub async fn _register(&self, input: RegisterUser) -> Result<UserView, BlogError> {
        let hashed_password = self.hasher.hash(&input.password)?;

        let txn = self.db.begin().await?;

        integrity::ensure_unique::<user::Entity, _>(
            &txn,
            user::Column::Email,
            &input.email,
            None,
            "user",
        )
        .await?;
        integrity::ensure_unique::<user::Entity, _>(
            &txn,
            user::Column::Username,
            &input.username,
            None,
            "user",
        )
        .await?;

        let user = user::ActiveModel {
            id: Set(UserId::new()),
            email: Set(input.email),
            username: Set(input.username),
            hashed_password: Set(hashed_password),
            full_name: Set(input.full_name),
            bio: Set(None),
            avatar_url: Set(None),
            is_active: Set(true),
            is_superuser: Set(false),
            is_verified: Set(false),
            verification_token: Set(Some(auth::generate_token())),
            password_reset_token: Set(None),
            password_reset_expires: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            last_login: Set(None),
            login_count: Set(0),
        };
        let user = user::Entity::insert(user).exec_with_returning(&txn).await?;

        txn.commit().await?;
        tracing::info!(user_id = %user.id, username = %user.username, "registered user");
        Ok(user.into())
    }

    /// Check credentials and bind `node_id` to the account.
    ///
    /// `identifier` may be either the email or the username.
    pub async fn _login(
        &self,
        node_id: &str,
        identifier: &str,
        password: &str,
    ) -> Result<UserView, BlogError> {
        let txn = self.db.begin().await?;

        let user = user::Entity::find()
            .filter(
                Condition::any()
                    .add(user::Column::Email.eq(identifier))
                    .add(user::Column::Username.eq(identifier)),
            )
            .one(&txn)
            .await?
            .ok_or(BlogError::Unauthenticated)?;

        if !self.hasher.verify(password, &user.hashed_password)? {
            tracing::info!(identifier, "rejected login");
            return Err(BlogError::Unauthenticated);
        }
        if !user.is_active {
            return Err(BlogError::InactiveUser);
        }

        let login_count = user.login_count + 1;
        let mut active: user::ActiveModel = user.into();
        active.last_login = Set(Some(Utc::now()));
        active.login_count = Set(login_count);
        let user = active.update(&txn).await?;

        auth::bind_session(&txn, node_id, user.id, self.auth.session_ttl_minutes).await?;

        txn.commit().await?;
        tracing::info!(user_id = %user.id, node_id, "user logged in");
        Ok(user.into())
    }

    pub async fn _logout(&self, node_id: &str) -> Result<(), BlogError> {
        auth::end_session(&self.db, node_id).await
    }

    pub async fn _me(&self, principal: &Principal) -> Result<UserView, BlogError> {
        Ok(self.find(principal.user_id).await?.into())
    }

    pub async fn _update_me(
        &self,
        principal: &Principal,
        changes: ProfileChanges,
    ) -> Result<UserView, BlogError> {
        self.apply_changes(principal.user_id, changes, None).await
    }

    pub async fn _get_profile(&self, username: &str) -> Result<UserProfile, BlogError> {
        user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await?
            .map(UserProfile::from)
            .ok_or(BlogError::NotFound(Resource::User))
    }

    pub async fn _list_users(
        &self,
        principal: &Principal,
        page: Page,
    ) -> Result<Vec<UserView>, BlogError> {
        principal.require_superuser()?;

        let users = user::Entity::find()
            .order_by_asc(user::Column::CreatedAt)
            .offset(page.skip)
            .limit(page.limit_or(DEFAULT_PAGE_SIZE, self.content.max_page_size))
            .all(&self.db)
            .await?;

        Ok(users.into_iter().map(UserView::from).collect())
    }

    pub async fn _update_user(
        &self,
        principal: &Principal,
        id: UserId,
        changes: AccountChanges,
    ) -> Result<UserView, BlogError> {
        principal.require_superuser()?;
        let flags = (changes.is_active, changes.is_superuser, changes.is_verified);
        self.apply_changes(id, changes.profile, Some(flags)).await
    }

    /// Remove an account together with everything it authored.
    ///
    /// Posts go through the regular post removal so category and tag counts
    /// are recomputed.
    pub async fn _delete_user(&self, principal: &Principal, id: UserId) -> Result<(), BlogError> {
        principal.require_superuser()?;
        if principal.user_id == id {
            return Err(BlogError::Forbidden("cannot delete your own account"));
        }

        let txn = self.db.begin().await?;

        let user = user::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::User))?;

        let authored = post::Entity::find()
            .filter(post::Column::AuthorId.eq(id))
            .all(&txn)
            .await?;
        for post in &authored {
            posts::remove_post(&txn, post).await?;
        }

        let roots: BTreeSet<_> = comment::Entity::find()
            .filter(comment::Column::UserId.eq(id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|comment| comment.id)
            .collect();
        comments::remove_subtrees(&txn, roots).await?;

        auth::end_user_sessions(&txn, id).await?;
        user::Entity::delete_by_id(user.id).exec(&txn).await?;

        txn.commit().await?;
        tracing::info!(user_id = %id, posts = authored.len(), "deleted user");
        Ok(())
    }

    pub async fn _change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), BlogError> {
        let user = self.find(principal.user_id).await?;
        if !self.hasher.verify(current_password, &user.hashed_password)? {
            return Err(BlogError::Unauthenticated);
        }

        let mut active: user::ActiveModel = user.into();
        active.hashed_password = Set(self.hasher.hash(new_password)?);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&self.db).await?;
        Ok(())
    }

    /// Issue a reset token if `email` belongs to an account.
    ///
    /// Succeeds either way so callers cannot probe for registered addresses.
    pub async fn _request_password_reset(&self, email: &str) -> Result<(), BlogError> {
        let Some(user) = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await?
        else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let user_id = user.id;
        let mut active: user::ActiveModel = user.into();
        active.password_reset_token = Set(Some(auth::generate_token()));
        active.password_reset_expires = Set(Some(
            Utc::now() + Duration::hours(self.auth.password_reset_ttl_hours),
        ));
        active.update(&self.db).await?;

        tracing::info!(%user_id, "issued password reset token");
        Ok(())
    }

    pub async fn _reset_password(&self, token: &str, new_password: &str) -> Result<(), BlogError> {
        let hashed_password = self.hasher.hash(new_password)?;

        let txn = self.db.begin().await?;

        let user = user::Entity::find()
            .filter(user::Column::PasswordResetToken.eq(token))
            .one(&txn)
            .await?
            .filter(|user| {
                user.password_reset_expires
                    .is_some_and(|expires| expires > Utc::now())
            })
            .ok_or(BlogError::InvalidToken)?;

        let user_id = user.id;
        let mut active: user::ActiveModel = user.into();
        active.hashed_password = Set(hashed_password);
        active.password_reset_token = Set(None);
        active.password_reset_expires = Set(None);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        auth::end_user_sessions(&txn, user_id).await?;

        txn.commit().await?;
        tracing::info!(%user_id, "password reset");
        Ok(())
    }

    pub async fn _verify_email(&self, token: &str) -> Result<UserView, BlogError> {
        let user = user::Entity::find()
            .filter(user::Column::VerificationToken.eq(token))
            .one(&self.db)
            .await?
            .ok_or(BlogError::InvalidToken)?;

        let mut active: user::ActiveModel = user.into();
        active.is_verified = Set(true);
        active.verification_token = Set(None);
        active.updated_at = Set(Some(Utc::now()));
        let user = active.update(&self.db).await?;

        tracing::info!(user_id = %user.id, "email verified");
        Ok(user.into())
    }

    async fn find(&self, id: UserId) -> Result<user::Model, BlogError> {
        user::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::User))
    }

    async fn apply_changes(
        &self,
        id: UserId,
        changes: ProfileChanges,
        flags: Option<(Option<bool>, Option<bool>, Option<bool>)>,
    ) -> Result<UserView, BlogError> {
        let txn = self.db.begin().await?;

        let user = user::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::User))?;

        let this_user = Some((user::Column::Id, Value::from(id)));
        if let Some(email) = &changes.email {
            integrity::ensure_unique::<user::Entity, _>(
                &txn,
                user::Column::Email,
                email,
                this_user.clone(),
                "user",
            )
            .await?;
        }
        if let Some(username) = &changes.username {
            integrity::ensure_unique::<user::Entity, _>(
                &txn,
                user::Column::Username,
                username,
                this_user,
                "user",
            )
            .await?;
        }

        let mut active: user::ActiveModel = user.into();
        if let Some(email) = changes.email {
            active.email = Set(email);
        }
        if let Some(username) = changes.username {
            active.username = Set(username);
        }
        if let Some(full_name) = changes.full_name {
            active.full_name = Set(Some(full_name));
        }
        if let Some(bio) = changes.bio {
            active.bio = Set(Some(bio));
        }
        if let Some(avatar_url) = changes.avatar_url {
            active.avatar_url = Set(Some(avatar_url));
        }
        if let Some((is_active, is_superuser, is_verified)) = flags {
            if let Some(is_active) = is_active {
                active.is_active = Set(is_active);
            }
            if let Some(is_superuser) = is_superuser {
                active.is_superuser = Set(is_superuser);
            }
            if let Some(is_verified) = is_verified {
                active.is_verified = Set(is_verified);
            }
        }
        active.updated_at = Set(Some(Utc::now()));
        let user = active.update(&txn).await?;

        txn.commit().await?;
        Ok(user.into())
    }
}

#[zel_service(name = "users")]
trait Users {
    #[doc = "Create a new, unverified account"]
    #[method(name = "register")]
    async fn register(&self, input: RegisterUser) -> Result<UserView, ResourceError>;

    #[doc = "Log in by email or username and bind this node to the account"]
    #[method(name = "login")]
    async fn login(&self, identifier: String, password: String)
        -> Result<UserView, ResourceError>;

    #[doc = "Forget this node's session"]
    #[method(name = "logout")]
    async fn logout(&self) -> Result<(), ResourceError>;

    #[doc = "The calling user's account"]
    #[method(name = "me")]
    async fn me(&self) -> Result<UserView, ResourceError>;

    #[doc = "Update the calling user's account"]
    #[method(name = "update_me")]
    async fn update_me(&self, changes: ProfileChanges) -> Result<UserView, ResourceError>;

    #[doc = "Public profile by username"]
    #[method(name = "get_profile")]
    async fn get_profile(&self, username: String) -> Result<UserProfile, ResourceError>;

    #[doc = "List all accounts (superuser)"]
    #[method(name = "list_users")]
    async fn list_users(&self, page: Page) -> Result<Vec<UserView>, ResourceError>;

    #[doc = "Update any account (superuser)"]
    #[method(name = "update_user")]
    async fn update_user(
        &self,
        id: UserId,
        changes: AccountChanges,
    ) -> Result<UserView, ResourceError>;

    #[doc = "Delete an account and everything it authored (superuser)"]
    #[method(name = "delete_user")]
    async fn delete_user(&self, id: UserId) -> Result<(), ResourceError>;

    #[doc = "Change the calling user's password"]
    #[method(name = "change_password")]
    async fn change_password(
        &self,
        current_password: String,
        new_password: String,
    ) -> Result<(), ResourceError>;

    #[doc = "Issue a password reset token; always succeeds"]
    #[method(name = "request_password_reset")]
    async fn request_password_reset(&self, email: String) -> Result<(), ResourceError>;

    #[doc = "Set a new password using a reset token"]
    #[method(name = "reset_password")]
    async fn reset_password(&self, token: String, new_password: String)
        -> Result<(), ResourceError>;

    #[doc = "Mark the account holding this token as verified"]
    #[method(name = "verify_email")]
    async fn verify_email(&self, token: String) -> Result<UserView, ResourceError>;
}

#[async_trait]
impl UsersServer for UsersService {
    async fn register(
        &self,
        _ctx: RequestContext,
        input: RegisterUser,
    ) -> Result<UserView, ResourceError> {
        Ok(self._register(input).await?)
    }

    async fn login(
        &self,
        ctx: RequestContext,
        identifier: String,
        password: String,
    ) -> Result<UserView, ResourceError> {
        Ok(self._login(&node_id(&ctx), &identifier, &password).await?)
    }

    async fn logout(&self, ctx: RequestContext) -> Result<(), ResourceError> {
        Ok(self._logout(&node_id(&ctx)).await?)
    }

    async fn me(&self, ctx: RequestContext) -> Result<UserView, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._me(&principal).await?)
    }

    async fn update_me(
        &self,
        ctx: RequestContext,
        changes: ProfileChanges,
    ) -> Result<UserView, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_me(&principal, changes).await?)
    }

    async fn get_profile(
        &self,
        _ctx: RequestContext,
        username: String,
    ) -> Result<UserProfile, ResourceError> {
        Ok(self._get_profile(&username).await?)
    }

    async fn list_users(
        &self,
        ctx: RequestContext,
        page: Page,
    ) -> Result<Vec<UserView>, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._list_users(&principal, page).await?)
    }

    async fn update_user(
        &self,
        ctx: RequestContext,
        id: UserId,
        changes: AccountChanges,
    ) -> Result<UserView, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_user(&principal, id, changes).await?)
    }

    async fn delete_user(&self, ctx: RequestContext, id: UserId) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._delete_user(&principal, id).await?)
    }

    async fn change_password(
        &self,
        ctx: RequestContext,
        current_password: String,
        new_password: String,
    ) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self
            ._change_password(&principal, &current_password, &new_password)
            .await?)
    }

    async fn request_password_reset(
        &self,
        _ctx: RequestContext,
        email: String,
    ) -> Result<(), ResourceError> {
        Ok(self._request_password_reset(&email).await?)
    }

    async fn reset_password(
        &self,
        _ctx: RequestContext,
        token: String,
        new_password: String,
    ) -> Result<(), ResourceError> {
        Ok(self._reset_password(&token, &new_password).await?)
    }

    async fn verify_email(
        &self,
        _ctx: RequestContext,
        token: String,
    ) -> Result<UserView, ResourceError> {
        Ok(self._verify_email(&token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{category, session, tag},
        service::{
            categories::{CategoriesService, NewCategory},
            posts::{NewPost, PostsService},
            tags::{NewTag, TagsService},
        },
        test_utils,
    };

    fn service(db: &DatabaseConnection) -> UsersService {
        UsersService::new(
            db.clone(),
            AuthSettings::default(),
            ContentSettings::default(),
            Arc::new(test_utils::fast_hasher()),
        )
    }

    fn registration(username: &str) -> RegisterUser {
        RegisterUser {
            email: format!("{username}@example.com"),
            username: username.to_string(),
            password: "hunter22".to_string(),
            full_name: None,
        }
    }

    async fn stored(db: &DatabaseConnection, id: UserId) -> user::Model {
        user::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_register_starts_unverified() {
        let db = test_utils::setup_db().await;
        let users = service(&db);

        let view = users._register(registration("ada")).await.unwrap();
        assert!(!view.is_verified);
        assert!(view.is_active);
        assert!(!view.is_superuser);

        let row = stored(&db, view.id).await;
        assert!(row.verification_token.is_some());
        assert_ne!(row.hashed_password, "hunter22");
    }

    #[tokio::test]
    async fn test_register_rejects_taken_email_and_username() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        users._register(registration("ada")).await.unwrap();

        let same_username = RegisterUser {
            email: "other@example.com".to_string(),
            ..registration("ada")
        };
        assert!(matches!(
            users._register(same_username).await,
            Err(BlogError::Conflict(_))
        ));

        let same_email = RegisterUser {
            username: "someone".to_string(),
            ..registration("ada")
        };
        assert!(matches!(
            users._register(same_email).await,
            Err(BlogError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_login_by_email_or_username() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let view = users._register(registration("ada")).await.unwrap();

        let first = users._login("node-1", "ada", "hunter22").await.unwrap();
        assert_eq!(first.login_count, 1);
        assert!(first.last_login.is_some());

        let second = users
            ._login("node-2", "ada@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(second.login_count, 2);

        let principal = auth::resolve_principal(&db, "node-2").await.unwrap();
        assert_eq!(principal.user_id, view.id);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        users._register(registration("ada")).await.unwrap();

        assert!(matches!(
            users._login("node", "ada", "wrong").await,
            Err(BlogError::Unauthenticated)
        ));
        assert!(matches!(
            users._login("node", "nobody", "hunter22").await,
            Err(BlogError::Unauthenticated)
        ));
        let sessions = session::Entity::find().all(&db).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_login() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let view = users._register(registration("ada")).await.unwrap();
        test_utils::deactivate_user(&db, view.id).await;

        assert!(matches!(
            users._login("node", "ada", "hunter22").await,
            Err(BlogError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        users._register(registration("ada")).await.unwrap();
        users._login("node", "ada", "hunter22").await.unwrap();

        users._logout("node").await.unwrap();
        assert!(matches!(
            auth::resolve_principal(&db, "node").await,
            Err(BlogError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_verify_email_consumes_token() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let view = users._register(registration("ada")).await.unwrap();
        let token = stored(&db, view.id).await.verification_token.unwrap();

        let verified = users._verify_email(&token).await.unwrap();
        assert!(verified.is_verified);
        assert!(matches!(
            users._verify_email(&token).await,
            Err(BlogError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let view = users._register(registration("ada")).await.unwrap();

        users._request_password_reset("ada@example.com").await.unwrap();
        let token = stored(&db, view.id).await.password_reset_token.unwrap();

        users._reset_password(&token, "new-secret").await.unwrap();
        assert!(users._login("node", "ada", "new-secret").await.is_ok());
        assert!(matches!(
            users._reset_password(&token, "again").await,
            Err(BlogError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_password_reset_does_not_reveal_unknown_emails() {
        let db = test_utils::setup_db().await;
        let users = service(&db);

        assert!(users._request_password_reset("ghost@example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_reset_token_is_rejected() {
        let db = test_utils::setup_db().await;
        let users = UsersService::new(
            db.clone(),
            AuthSettings {
                password_reset_ttl_hours: -1,
                ..AuthSettings::default()
            },
            ContentSettings::default(),
            Arc::new(test_utils::fast_hasher()),
        );
        let view = users._register(registration("ada")).await.unwrap();
        users._request_password_reset("ada@example.com").await.unwrap();
        let token = stored(&db, view.id).await.password_reset_token.unwrap();

        assert!(matches!(
            users._reset_password(&token, "new-secret").await,
            Err(BlogError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_change_password_checks_current() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let view = users._register(registration("ada")).await.unwrap();
        let principal = Principal::from_user(&stored(&db, view.id).await);

        assert!(matches!(
            users._change_password(&principal, "wrong", "x").await,
            Err(BlogError::Unauthenticated)
        ));
        users
            ._change_password(&principal, "hunter22", "better-pw")
            .await
            .unwrap();
        assert!(users._login("node", "ada", "better-pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_me_keeps_usernames_unique() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        users._register(registration("ada")).await.unwrap();
        let grace = users._register(registration("grace")).await.unwrap();
        let principal = Principal::from_user(&stored(&db, grace.id).await);

        let taken = ProfileChanges {
            username: Some("ada".to_string()),
            ..ProfileChanges::default()
        };
        assert!(matches!(
            users._update_me(&principal, taken).await,
            Err(BlogError::Conflict(_))
        ));

        let fine = ProfileChanges {
            username: Some("grace".to_string()),
            bio: Some("Compilers".to_string()),
            ..ProfileChanges::default()
        };
        let updated = users._update_me(&principal, fine).await.unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Compilers"));

        let profile = users._get_profile("grace").await.unwrap();
        assert_eq!(profile.id, grace.id);
        assert!(matches!(
            users._get_profile("nobody").await,
            Err(BlogError::NotFound(Resource::User))
        ));
    }

    #[tokio::test]
    async fn test_admin_operations_require_superuser() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let reader = test_utils::writer(&db, "reader").await;
        let admin = test_utils::admin(&db, "root").await;

        assert!(matches!(
            users._list_users(&reader, Page::default()).await,
            Err(BlogError::Forbidden(_))
        ));
        assert_eq!(users._list_users(&admin, Page::default()).await.unwrap().len(), 2);

        let promoted = users
            ._update_user(
                &admin,
                reader.user_id,
                AccountChanges {
                    is_superuser: Some(true),
                    ..AccountChanges::default()
                },
            )
            .await
            .unwrap();
        assert!(promoted.is_superuser);
    }

    #[tokio::test]
    async fn test_superuser_cannot_delete_self() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let admin = test_utils::admin(&db, "root").await;

        assert!(matches!(
            users._delete_user(&admin, admin.user_id).await,
            Err(BlogError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_user_recounts_taxonomy() {
        let db = test_utils::setup_db().await;
        let users = service(&db);
        let categories = CategoriesService::new(db.clone(), ContentSettings::default());
        let tags = TagsService::new(db.clone(), ContentSettings::default());
        let posts = PostsService::new(db.clone(), ContentSettings::default());

        let admin = test_utils::admin(&db, "root").await;
        let doomed = test_utils::writer(&db, "doomed").await;
        let other = test_utils::writer(&db, "other").await;

        let tech = categories
            ._create_category(&admin, NewCategory::named("Tech"))
            .await
            .unwrap();
        let ai = tags._create_tag(&admin, NewTag::named("AI")).await.unwrap();

        let mut input = NewPost::titled("Doomed post", "body");
        input.category_id = Some(tech.id);
        input.tag_ids = vec![ai.id];
        posts._create_post(&doomed, input.clone()).await.unwrap();

        input.title = "Surviving post".to_string();
        let kept = posts._create_post(&other, input).await.unwrap();

        users._delete_user(&admin, doomed.user_id).await.unwrap();

        let tech = category::Entity::find_by_id(tech.id).one(&db).await.unwrap().unwrap();
        let ai = tag::Entity::find_by_id(ai.id).one(&db).await.unwrap().unwrap();
        assert_eq!(tech.post_count, 1);
        assert_eq!(ai.post_count, 1);
        assert!(post::Entity::find_by_id(kept.post.id).one(&db).await.unwrap().is_some());
        assert!(user::Entity::find_by_id(doomed.user_id).one(&db).await.unwrap().is_none());
    }
}
