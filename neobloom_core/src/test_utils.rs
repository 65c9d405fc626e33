//! Shared fixtures for the in-crate tests.
//!
//! Rows inserted here bypass the services, so counters are left at zero and
//! tests that care about them go through the service layer instead.

use std::path::PathBuf;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;

use crate::{
    auth::{Argon2Hasher, Principal},
    entity::{category, comment, post, post_tag, tag, user},
    ids::{CategoryId, CommentId, PostId, TagId, UserId},
    models::migrator::Migrator,
};

/// Fresh in-memory database with every migration applied.
pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// File-backed database in a scratch directory, pooled over several
/// connections so concurrent calls really reach SQLite at the same time.
///
/// The caller removes the returned directory when done.
pub async fn setup_file_db(name: &str) -> (DatabaseConnection, PathBuf) {
    let dir = std::env::temp_dir().join(format!("neobloom-{name}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).expect("Failed to create scratch dir");

    let url = format!("sqlite://{}?mode=rwc", dir.join("blog.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options.max_connections(8).sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("Failed to open file database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    (db, dir)
}

/// Argon2 with minimal cost so hashing does not dominate test time.
pub fn fast_hasher() -> Argon2Hasher {
    Argon2Hasher::with_params(1024, 1, 1).expect("valid argon2 params")
}

pub async fn insert_user(
    db: &DatabaseConnection,
    username: &str,
    is_superuser: bool,
    is_verified: bool,
) -> user::Model {
    let user = user::ActiveModel {
        id: Set(UserId::new()),
        email: Set(format!("{username}@example.com")),
        username: Set(username.to_string()),
        hashed_password: Set("unused".to_string()),
        full_name: Set(None),
        bio: Set(None),
        avatar_url: Set(None),
        is_active: Set(true),
        is_superuser: Set(is_superuser),
        is_verified: Set(is_verified),
        verification_token: Set(None),
        password_reset_token: Set(None),
        password_reset_expires: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        last_login: Set(None),
        login_count: Set(0),
    };
    user::Entity::insert(user)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert user")
}

pub async fn deactivate_user(db: &DatabaseConnection, id: UserId) {
    let user = user::ActiveModel {
        id: Set(id),
        is_active: Set(false),
        ..Default::default()
    };
    user.update(db).await.expect("Failed to deactivate user");
}

pub async fn writer(db: &DatabaseConnection, username: &str) -> Principal {
    Principal::from_user(&insert_user(db, username, false, true).await)
}

pub async fn admin(db: &DatabaseConnection, username: &str) -> Principal {
    Principal::from_user(&insert_user(db, username, true, true).await)
}

pub async fn insert_category(
    db: &DatabaseConnection,
    name: &str,
    parent_id: Option<CategoryId>,
) -> category::Model {
    let category = category::ActiveModel {
        id: Set(CategoryId::new()),
        name: Set(name.to_string()),
        slug: Set(crate::slug::normalize(name)),
        description: Set(None),
        icon: Set(None),
        color: Set(None),
        parent_id: Set(parent_id),
        post_count: Set(0),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    category::Entity::insert(category)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert category")
}

pub async fn insert_tag(db: &DatabaseConnection, name: &str) -> tag::Model {
    let tag = tag::ActiveModel {
        id: Set(TagId::new()),
        name: Set(name.to_string()),
        slug: Set(crate::slug::normalize(name)),
        description: Set(None),
        color: Set(None),
        post_count: Set(0),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    tag::Entity::insert(tag)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert tag")
}

pub async fn insert_post(
    db: &DatabaseConnection,
    author_id: UserId,
    title: &str,
    category_id: Option<CategoryId>,
    tags: &[TagId],
) -> post::Model {
    let post = post::ActiveModel {
        id: Set(PostId::new()),
        title: Set(title.to_string()),
        slug: Set(crate::slug::normalize(title)),
        content: Set("Lorem ipsum".to_string()),
        summary: Set(None),
        featured_image: Set(None),
        is_published: Set(true),
        is_featured: Set(false),
        view_count: Set(0),
        like_count: Set(0),
        reading_time: Set(1),
        meta_title: Set(None),
        meta_description: Set(None),
        meta_keywords: Set(None),
        published_at: Set(Some(Utc::now())),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        author_id: Set(author_id),
        category_id: Set(category_id),
    };
    let post = post::Entity::insert(post)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert post");

    for tag_id in tags {
        let link = post_tag::ActiveModel {
            post_id: Set(post.id),
            tag_id: Set(*tag_id),
        };
        post_tag::Entity::insert(link)
            .exec_without_returning(db)
            .await
            .expect("Failed to link tag");
    }
    post
}

pub async fn insert_comment(
    db: &DatabaseConnection,
    post_id: PostId,
    user_id: UserId,
    parent_id: Option<CommentId>,
) -> comment::Model {
    let comment = comment::ActiveModel {
        id: Set(CommentId::new()),
        content: Set("Nice post".to_string()),
        is_approved: Set(true),
        like_count: Set(0),
        post_id: Set(post_id),
        user_id: Set(user_id),
        parent_id: Set(parent_id),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    comment::Entity::insert(comment)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert comment")
}
