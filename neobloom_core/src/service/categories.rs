use chrono::Utc;
use sea_orm::{sea_query::Expr, Value};
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    auth::Principal,
    config::ContentSettings,
    entity::prelude::*,
    error::{BlogError, Resource},
    ids::CategoryId,
    integrity, slug,
    service::{build_tree, caller, Page, Reassign},
};

const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub parent_id: Option<CategoryId>,
}

impl NewCategory {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: None,
            description: None,
            icon: None,
            color: None,
            parent_id: None,
        }
    }
}

/// `None` leaves a field unchanged. The slug only changes when given here,
/// never as a side effect of renaming.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CategoryChanges {
    pub name: Option<String>,
    /// Empty keeps the current slug.
    pub slug: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub parent_id: Reassign<CategoryId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CategoryTree {
    pub category: CategoryModel,
    pub children: Vec<CategoryTree>,
}

#[derive(Clone)]
pub struct CategoriesService {
    db: DatabaseConnection,
    content: ContentSettings,
}

impl CategoriesService {
    pub fn new(db: DatabaseConnection, content: ContentSettings) -> Self {
        Self { db, content }
    }

    pub async fn _create_category(
        &self,
        principal: &Principal,
        input: NewCategory,
    ) -> Result<CategoryModel, BlogError> {
        principal.require_superuser()?;
        let slug = slug::assign(input.slug.as_deref(), &input.name)?;
        let id = CategoryId::new();

        let txn = self.db.begin().await?;

        integrity::ensure_unique::<Category, _>(
            &txn,
            CategoryColumn::Name,
            &input.name,
            None,
            "category",
        )
        .await?;
        integrity::ensure_unique::<Category, _>(
            &txn,
            CategoryColumn::Slug,
            &slug,
            None,
            "category",
        )
        .await?;
        if let Some(parent_id) = input.parent_id {
            integrity::validate_category_parent(&txn, id, parent_id).await?;
        }

        let category = CategoryActiveModel {
            id: Set(id),
            name: Set(input.name),
            slug: Set(slug),
            description: Set(input.description),
            icon: Set(input.icon),
            color: Set(input.color),
            parent_id: Set(input.parent_id),
            post_count: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let category = Category::insert(category)
            .exec_with_returning(&txn)
            .await?;

        txn.commit().await?;
        tracing::info!(category_id = %category.id, slug = %category.slug, "created category");
        Ok(category)
    }

    pub async fn _update_category(
        &self,
        principal: &Principal,
        id: CategoryId,
        changes: CategoryChanges,
    ) -> Result<CategoryModel, BlogError> {
        principal.require_superuser()?;

        let txn = self.db.begin().await?;

        let existing = Category::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Category))?;

        let this_row = Some((CategoryColumn::Id, Value::from(id)));
        if let Some(name) = &changes.name {
            integrity::ensure_unique::<Category, _>(
                &txn,
                CategoryColumn::Name,
                name,
                this_row.clone(),
                "category",
            )
            .await?;
        }
        let new_slug = match changes.slug.as_deref().filter(|s| !s.is_empty()) {
            Some(explicit) => {
                let name = changes.name.as_deref().unwrap_or(&existing.name);
                let slug = slug::assign(Some(explicit), name)?;
                integrity::ensure_unique::<Category, _>(
                    &txn,
                    CategoryColumn::Slug,
                    &slug,
                    this_row,
                    "category",
                )
                .await?;
                Some(slug)
            }
            None => None,
        };
        if let Reassign::To(parent_id) = changes.parent_id {
            integrity::validate_category_parent(&txn, id, parent_id).await?;
        }

        let parent_id = changes.parent_id.apply(existing.parent_id);
        let mut active: CategoryActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(slug) = new_slug {
            active.slug = Set(slug);
        }
        if let Some(description) = changes.description {
            active.description = Set(Some(description));
        }
        if let Some(icon) = changes.icon {
            active.icon = Set(Some(icon));
        }
        if let Some(color) = changes.color {
            active.color = Set(Some(color));
        }
        active.parent_id = Set(parent_id);
        active.updated_at = Set(Some(Utc::now()));
        let category = active.update(&txn).await?;

        txn.commit().await?;
        tracing::info!(category_id = %category.id, "updated category");
        Ok(category)
    }

    /// Delete a category that owns no posts. Subcategories become top-level.
    pub async fn _delete_category(
        &self,
        principal: &Principal,
        id: CategoryId,
    ) -> Result<(), BlogError> {
        principal.require_superuser()?;

        let txn = self.db.begin().await?;

        Category::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Category))?;
        integrity::validate_category_deletable(&txn, id).await?;

        Category::update_many()
            .col_expr(CategoryColumn::ParentId, Expr::value(Option::<CategoryId>::None))
            .filter(CategoryColumn::ParentId.eq(id))
            .exec(&txn)
            .await?;
        Category::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        tracing::info!(category_id = %id, "deleted category");
        Ok(())
    }

    pub async fn _get_category(&self, id: CategoryId) -> Result<CategoryModel, BlogError> {
        Category::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Category))
    }

    pub async fn _get_category_by_slug(&self, slug: &str) -> Result<CategoryModel, BlogError> {
        Category::find()
            .filter(CategoryColumn::Slug.eq(slug))
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Category))
    }

    /// Top-level categories, by name.
    pub async fn _list_categories(&self, page: Page) -> Result<Vec<CategoryModel>, BlogError> {
        let categories = Category::find()
            .filter(CategoryColumn::ParentId.is_null())
            .order_by_asc(CategoryColumn::Name)
            .offset(page.skip)
            .limit(page.limit_or(DEFAULT_PAGE_SIZE, self.content.max_page_size))
            .all(&self.db)
            .await?;
        Ok(categories)
    }

    /// Every category, nested under its parent.
    pub async fn _category_tree(&self) -> Result<Vec<CategoryTree>, BlogError> {
        let rows = Category::find()
            .order_by_asc(CategoryColumn::Name)
            .all(&self.db)
            .await?;

        Ok(build_tree(
            rows,
            None,
            |row| row.id,
            |row| row.parent_id,
            |category, children| CategoryTree { category, children },
        ))
    }
}

#[zel_service(name = "categories")]
trait Categories {
    #[doc = "Create a category (superuser)"]
    #[method(name = "create_category")]
    async fn create_category(&self, input: NewCategory) -> Result<CategoryModel, ResourceError>;

    #[doc = "Update a category (superuser)"]
    #[method(name = "update_category")]
    async fn update_category(
        &self,
        id: CategoryId,
        changes: CategoryChanges,
    ) -> Result<CategoryModel, ResourceError>;

    #[doc = "Delete a category that owns no posts (superuser)"]
    #[method(name = "delete_category")]
    async fn delete_category(&self, id: CategoryId) -> Result<(), ResourceError>;

    #[doc = "Get a category by ID"]
    #[method(name = "get_category")]
    async fn get_category(&self, id: CategoryId) -> Result<CategoryModel, ResourceError>;

    #[doc = "Get a category by slug"]
    #[method(name = "get_category_by_slug")]
    async fn get_category_by_slug(&self, slug: String) -> Result<CategoryModel, ResourceError>;

    #[doc = "List top-level categories"]
    #[method(name = "list_categories")]
    async fn list_categories(&self, page: Page) -> Result<Vec<CategoryModel>, ResourceError>;

    #[doc = "All categories as a tree"]
    #[method(name = "category_tree")]
    async fn category_tree(&self) -> Result<Vec<CategoryTree>, ResourceError>;
}

#[async_trait]
impl CategoriesServer for CategoriesService {
    async fn create_category(
        &self,
        ctx: RequestContext,
        input: NewCategory,
    ) -> Result<CategoryModel, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._create_category(&principal, input).await?)
    }

    async fn update_category(
        &self,
        ctx: RequestContext,
        id: CategoryId,
        changes: CategoryChanges,
    ) -> Result<CategoryModel, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_category(&principal, id, changes).await?)
    }

    async fn delete_category(
        &self,
        ctx: RequestContext,
        id: CategoryId,
    ) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._delete_category(&principal, id).await?)
    }

    async fn get_category(
        &self,
        _ctx: RequestContext,
        id: CategoryId,
    ) -> Result<CategoryModel, ResourceError> {
        Ok(self._get_category(id).await?)
    }

    async fn get_category_by_slug(
        &self,
        _ctx: RequestContext,
        slug: String,
    ) -> Result<CategoryModel, ResourceError> {
        Ok(self._get_category_by_slug(&slug).await?)
    }

    async fn list_categories(
        &self,
        _ctx: RequestContext,
        page: Page,
    ) -> Result<Vec<CategoryModel>, ResourceError> {
        Ok(self._list_categories(page).await?)
    }

    async fn category_tree(&self, _ctx: RequestContext) -> Result<Vec<CategoryTree>, ResourceError> {
        Ok(self._category_tree().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn service(db: &DatabaseConnection) -> CategoriesService {
        CategoriesService::new(db.clone(), ContentSettings::default())
    }

    #[tokio::test]
    async fn test_create_category_derives_slug() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;

        let category = service(&db)
            ._create_category(&admin, NewCategory::named("Web Development"))
            .await
            .unwrap();

        assert_eq!(category.slug, "web-development");
        assert_eq!(category.post_count, 0);
        assert_eq!(category.parent_id, None);
    }

    #[tokio::test]
    async fn test_create_category_requires_superuser() {
        let db = test_utils::setup_db().await;
        let writer = test_utils::writer(&db, "writer").await;

        let result = service(&db)
            ._create_category(&writer, NewCategory::named("Tech"))
            .await;
        assert!(matches!(result, Err(BlogError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_duplicate_slug_or_name_conflicts() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let categories = service(&db);
        categories
            ._create_category(&admin, NewCategory::named("Tech"))
            .await
            .unwrap();

        let same_slug = NewCategory {
            slug: Some("tech".to_string()),
            ..NewCategory::named("Technology")
        };
        assert!(matches!(
            categories._create_category(&admin, same_slug).await,
            Err(BlogError::Conflict(_))
        ));
        assert!(matches!(
            categories
                ._create_category(&admin, NewCategory::named("Tech"))
                .await,
            Err(BlogError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_slug_is_rejected() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;

        let result = service(&db)
            ._create_category(&admin, NewCategory::named("???"))
            .await;
        assert!(matches!(result, Err(BlogError::EmptySlug)));
    }

    #[tokio::test]
    async fn test_unknown_parent_is_not_found() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;

        let input = NewCategory {
            parent_id: Some(CategoryId::new()),
            ..NewCategory::named("Orphan")
        };
        assert!(matches!(
            service(&db)._create_category(&admin, input).await,
            Err(BlogError::NotFound(Resource::ParentCategory))
        ));
    }

    #[tokio::test]
    async fn test_self_parenting_is_rejected() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let categories = service(&db);
        let tech = categories
            ._create_category(&admin, NewCategory::named("Tech"))
            .await
            .unwrap();

        let changes = CategoryChanges {
            parent_id: Reassign::To(tech.id),
            ..CategoryChanges::default()
        };
        assert!(matches!(
            categories._update_category(&admin, tech.id, changes).await,
            Err(BlogError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_reparenting_under_descendant_is_rejected() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let categories = service(&db);
        let a = categories
            ._create_category(&admin, NewCategory::named("A"))
            .await
            .unwrap();
        let b = categories
            ._create_category(
                &admin,
                NewCategory {
                    parent_id: Some(a.id),
                    ..NewCategory::named("B")
                },
            )
            .await
            .unwrap();

        let changes = CategoryChanges {
            parent_id: Reassign::To(b.id),
            ..CategoryChanges::default()
        };
        assert!(matches!(
            categories._update_category(&admin, a.id, changes).await,
            Err(BlogError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_keeps_slug_unless_given() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let categories = service(&db);
        let tech = categories
            ._create_category(&admin, NewCategory::named("Tech"))
            .await
            .unwrap();

        let renamed = categories
            ._update_category(
                &admin,
                tech.id,
                CategoryChanges {
                    name: Some("Technology".to_string()),
                    ..CategoryChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Technology");
        assert_eq!(renamed.slug, "tech");

        let reslugged = categories
            ._update_category(
                &admin,
                tech.id,
                CategoryChanges {
                    slug: Some("Tech Stuff".to_string()),
                    ..CategoryChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(reslugged.slug, "tech-stuff");

        // Re-submitting its own slug is not a conflict.
        let same = categories
            ._update_category(
                &admin,
                tech.id,
                CategoryChanges {
                    slug: Some("tech-stuff".to_string()),
                    ..CategoryChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.slug, "tech-stuff");

        let blank = categories
            ._update_category(
                &admin,
                tech.id,
                CategoryChanges {
                    name: Some("Tech News".to_string()),
                    slug: Some(String::new()),
                    ..CategoryChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(blank.slug, "tech-stuff");
    }

    #[tokio::test]
    async fn test_clear_parent() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let root = test_utils::insert_category(&db, "Root", None).await;
        let child = test_utils::insert_category(&db, "Child", Some(root.id)).await;

        let moved = service(&db)
            ._update_category(
                &admin,
                child.id,
                CategoryChanges {
                    parent_id: Reassign::Clear,
                    ..CategoryChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.parent_id, None);
    }

    #[tokio::test]
    async fn test_delete_category_with_posts_conflicts() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let tech = test_utils::insert_category(&db, "Tech", None).await;
        test_utils::insert_post(&db, admin.user_id, "Owned", Some(tech.id), &[]).await;

        assert!(matches!(
            service(&db)._delete_category(&admin, tech.id).await,
            Err(BlogError::Conflict(_))
        ));
        assert!(service(&db)._get_category(tech.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_empty_category_detaches_children() {
        let db = test_utils::setup_db().await;
        let admin = test_utils::admin(&db, "root").await;
        let categories = service(&db);
        let parent = test_utils::insert_category(&db, "Parent", None).await;
        let child = test_utils::insert_category(&db, "Child", Some(parent.id)).await;

        categories._delete_category(&admin, parent.id).await.unwrap();

        assert!(matches!(
            categories._get_category(parent.id).await,
            Err(BlogError::NotFound(Resource::Category))
        ));
        let child = categories._get_category(child.id).await.unwrap();
        assert_eq!(child.parent_id, None);
    }

    #[tokio::test]
    async fn test_list_and_tree() {
        let db = test_utils::setup_db().await;
        let categories = service(&db);
        let web = test_utils::insert_category(&db, "Web", None).await;
        let ai = test_utils::insert_category(&db, "AI", None).await;
        test_utils::insert_category(&db, "Frontend", Some(web.id)).await;
        test_utils::insert_category(&db, "Backend", Some(web.id)).await;

        let top = categories._list_categories(Page::default()).await.unwrap();
        let names: Vec<_> = top.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["AI", "Web"]);

        let tree = categories._category_tree().await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].category.id, ai.id);
        let children: Vec<_> = tree[1]
            .children
            .iter()
            .map(|c| c.category.name.as_str())
            .collect();
        assert_eq!(children, ["Backend", "Frontend"]);

        let by_slug = categories._get_category_by_slug("web").await.unwrap();
        assert_eq!(by_slug.id, web.id);
    }
}
