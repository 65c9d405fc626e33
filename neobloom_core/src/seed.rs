use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};

use crate::{
    auth::PasswordHasher,
    config::{BootstrapAdmin, NeoBloomConfig},
    entity::{category, tag, user},
    error::BlogError,
    ids::{CategoryId, TagId, UserId},
};

struct CategorySeed {
    name: &'static str,
    slug: &'static str,
    description: &'static str,
    color: &'static str,
    icon: &'static str,
}

const CATEGORIES: &[CategorySeed] = &[
    CategorySeed {
        name: "Artificial Intelligence",
        slug: "artificial-intelligence",
        description: "Articles about AI, machine learning, and neural networks",
        color: "#3498db",
        icon: "FiCpu",
    },
    CategorySeed {
        name: "Web Development",
        slug: "web-development",
        description: "Articles about web development, frameworks, and best practices",
        color: "#e74c3c",
        icon: "FiCode",
    },
    CategorySeed {
        name: "Cyberpunk Design",
        slug: "cyberpunk-design",
        description: "Articles about cyberpunk aesthetics, neon design, and futuristic interfaces",
        color: "#9b59b6",
        icon: "FiZap",
    },
    CategorySeed {
        name: "Digital Marketing",
        slug: "digital-marketing",
        description: "Articles about SEO, content marketing, and social media strategies",
        color: "#2ecc71",
        icon: "FiTrendingUp",
    },
];

// (name, slug, color)
const TAGS: &[(&str, &str, &str)] = &[
    ("AI", "ai", "#3498db"),
    ("Machine Learning", "machine-learning", "#2980b9"),
    ("React", "react", "#61dafb"),
    ("Next.js", "nextjs", "#000000"),
    ("Python", "python", "#3776ab"),
    ("FastAPI", "fastapi", "#009688"),
    ("Cyberpunk", "cyberpunk", "#ff00ff"),
    ("Neon", "neon", "#39ff14"),
    ("SEO", "seo", "#ff9900"),
    ("Content Creation", "content-creation", "#ff6b6b"),
];

/// Startup data: the configured superuser and, when enabled, the default taxonomy.
pub async fn run(
    db: &DatabaseConnection,
    config: &NeoBloomConfig,
    hasher: &dyn PasswordHasher,
) -> Result<(), BlogError> {
    if let Some(admin) = &config.bootstrap_admin {
        bootstrap_superuser(db, admin, hasher).await?;
    }
    if config.seed_taxonomy {
        seed_taxonomy(db).await?;
    }
    Ok(())
}

/// Creates the superuser unless one already exists. Returns whether a row was inserted.
pub async fn bootstrap_superuser(
    db: &DatabaseConnection,
    admin: &BootstrapAdmin,
    hasher: &dyn PasswordHasher,
) -> Result<bool, BlogError> {
    let existing = user::Entity::find()
        .filter(user::Column::IsSuperuser.eq(true))
        .count(db)
        .await?;
    if existing > 0 {
        tracing::debug!("superuser already present, skipping bootstrap");
        return Ok(false);
    }

    let hashed_password = hasher.hash(&admin.password)?;
    let user = user::ActiveModel {
        id: Set(UserId::new()),
        email: Set(admin.email.clone()),
        username: Set(admin.username.clone()),
        hashed_password: Set(hashed_password),
        full_name: Set(None),
        bio: Set(None),
        avatar_url: Set(None),
        is_active: Set(true),
        is_superuser: Set(true),
        is_verified: Set(true),
        verification_token: Set(None),
        password_reset_token: Set(None),
        password_reset_expires: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        last_login: Set(None),
        login_count: Set(0),
    };
    user::Entity::insert(user).exec_without_returning(db).await?;

    tracing::info!(username = %admin.username, "created bootstrap superuser");
    Ok(true)
}

/// Inserts the default categories and tags into whichever of the two tables is empty.
pub async fn seed_taxonomy(db: &DatabaseConnection) -> Result<(), BlogError> {
    let txn = db.begin().await?;

    if category::Entity::find().count(&txn).await? == 0 {
        insert_categories(&txn).await?;
        tracing::info!(count = CATEGORIES.len(), "seeded categories");
    }
    if tag::Entity::find().count(&txn).await? == 0 {
        insert_tags(&txn).await?;
        tracing::info!(count = TAGS.len(), "seeded tags");
    }

    txn.commit().await?;
    Ok(())
}

async fn insert_categories<C: ConnectionTrait>(conn: &C) -> Result<(), BlogError> {
    let now = Utc::now();
    let rows = CATEGORIES.iter().map(|seed| category::ActiveModel {
        id: Set(CategoryId::new()),
        name: Set(seed.name.to_string()),
        slug: Set(seed.slug.to_string()),
        description: Set(Some(seed.description.to_string())),
        icon: Set(Some(seed.icon.to_string())),
        color: Set(Some(seed.color.to_string())),
        parent_id: Set(None),
        post_count: Set(0),
        created_at: Set(now),
        updated_at: Set(None),
    });
    category::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn insert_tags<C: ConnectionTrait>(conn: &C) -> Result<(), BlogError> {
    let now = Utc::now();
    let rows = TAGS.iter().map(|(name, slug, color)| tag::ActiveModel {
        id: Set(TagId::new()),
        name: Set(name.to_string()),
        slug: Set(slug.to_string()),
        description: Set(None),
        color: Set(Some(color.to_string())),
        post_count: Set(0),
        created_at: Set(now),
        updated_at: Set(None),
    });
    tag::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn credentials() -> BootstrapAdmin {
        BootstrapAdmin {
            email: "admin@neobloom.dev".to_string(),
            username: "admin".to_string(),
            password: "change-me".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_superuser_once() {
        let db = test_utils::setup_db().await;
        let hasher = test_utils::fast_hasher();

        assert!(bootstrap_superuser(&db, &credentials(), &hasher).await.unwrap());
        assert!(!bootstrap_superuser(&db, &credentials(), &hasher).await.unwrap());

        let admins = user::Entity::find()
            .filter(user::Column::IsSuperuser.eq(true))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(admins.len(), 1);
        assert!(admins[0].is_verified);
        assert!(hasher.verify("change-me", &admins[0].hashed_password).unwrap());
    }

    #[tokio::test]
    async fn test_existing_superuser_skips_bootstrap() {
        let db = test_utils::setup_db().await;
        test_utils::admin(&db, "root").await;

        let created = bootstrap_superuser(&db, &credentials(), &test_utils::fast_hasher())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(user::Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seed_taxonomy_is_idempotent() {
        let db = test_utils::setup_db().await;

        seed_taxonomy(&db).await.unwrap();
        seed_taxonomy(&db).await.unwrap();

        assert_eq!(category::Entity::find().count(&db).await.unwrap(), 4);
        assert_eq!(tag::Entity::find().count(&db).await.unwrap(), 10);

        let next = tag::Entity::find()
            .filter(tag::Column::Slug.eq("nextjs"))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.name, "Next.js");
        assert_eq!(next.post_count, 0);
    }

    #[tokio::test]
    async fn test_seed_leaves_populated_tables_alone() {
        let db = test_utils::setup_db().await;
        test_utils::insert_category(&db, "Rust", None).await;

        seed_taxonomy(&db).await.unwrap();

        assert_eq!(category::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(tag::Entity::find().count(&db).await.unwrap(), 10);
    }
}
