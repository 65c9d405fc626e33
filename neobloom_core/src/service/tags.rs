use chrono::Utc;
use sea_orm::Value;
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    auth::Principal,
    config::ContentSettings,
    entity::prelude::*,
    error::{BlogError, Resource},
    ids::TagId,
    integrity, slug,
    service::{caller, Page},
};

const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

impl NewTag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: None,
            description: None,
            color: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TagChanges {
    pub name: Option<String>,
    /// Empty keeps the current slug.
    pub slug: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Clone)]
pub struct TagsService {
    db: DatabaseConnection,
    content: ContentSettings,
}

impl TagsService {
    pub fn new(db: DatabaseConnection, content: ContentSettings) -> Self {
        Self { db, content }
    }

    pub async fn _create_tag(
        &self,
        principal: &Principal,
        input: NewTag,
    ) -> Result<TagModel, BlogError> {
        principal.require_superuser()?;
        let slug = slug::assign(input.slug.as_deref(), &input.name)?;

        let txn = self.db.begin().await?;

        integrity::ensure_unique::<Tag, _>(&txn, TagColumn::Name, &input.name, None, "tag")
            .await?;
        integrity::ensure_unique::<Tag, _>(&txn, TagColumn::Slug, &slug, None, "tag")
            .await?;

        let tag = TagActiveModel {
            id: Set(TagId::new()),
            name: Set(input.name),
            slug: Set(slug),
            description: Set(input.description),
            color: Set(input.color),
            post_count: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let tag = Tag::insert(tag).exec_with_returning(&txn).await?;

        txn.commit().await?;
        tracing::info!(tag_id = %tag.id, slug = %tag.slug, "created tag");
        Ok(tag)
    }

    pub async fn _update_tag(
        &self,
        principal: &Principal,
        id: TagId,
        changes: TagChanges,
    ) -> Result<TagModel, BlogError> {
        principal.require_superuser()?;

        let txn = self.db.begin().await?;

        let existing = Tag::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Tag))?;

        let this_row = Some((TagColumn::Id, Value::from(id)));
        if let Some(name) = &changes.name {
            integrity::ensure_unique::<Tag, _>(
                &txn,
                TagColumn::Name,
                name,
                this_row.clone(),
                "tag",
            )
            .await?;
        }
        let new_slug = match changes.slug.as_deref().filter(|s| !s.is_empty()) {
            Some(explicit) => {
                let name = changes.name.as_deref().unwrap_or(&existing.name);
                let slug = slug::assign(Some(explicit), name)?;
                integrity::ensure_unique::<Tag, _>(
                    &txn,
                    TagColumn::Slug,
                    &slug,
                    this_row,
                    "tag",
                )
                .await?;
                Some(slug)
            }
            None => None,
        };

        let mut active: TagActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(slug) = new_slug {
            active.slug = Set(slug);
        }
        if let Some(description) = changes.description {
            active.description = Set(Some(description));
        }
        if let Some(color) = changes.color {
            active.color = Set(Some(color));
        }
        active.updated_at = Set(Some(Utc::now()));
        let tag = active.update(&txn).await?;

        txn.commit().await?;
        tracing::info!(tag_id = %tag.id, "updated tag");
        Ok(tag)
    }

    /// Delete a tag that is attached to no posts.
    pub async fn _delete_tag(&self, principal: &Principal, id: TagId) -> Result<(), BlogError> {
        principal.require_superuser()?;

        let txn = self.db.begin().await?;

        Tag::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Tag))?;
        integrity::validate_tag_deletable(&txn, id).await?;
        Tag::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        tracing::info!(tag_id = %id, "deleted tag");
        Ok(())
    }

    pub async fn _get_tag(&self, id: TagId) -> Result<TagModel, BlogError> {
        Tag::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Tag))
    }

    pub async fn _get_tag_by_slug(&self, slug: &str) -> Result<TagModel, BlogError> {
        Tag::find()
            .filter(TagColumn::Slug.eq(slug))
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Tag))
    }

    pub async fn _list_tags(&self, page: Page) -> Result<Vec<TagModel>, BlogError> {
        let tags = Tag::find()
            .order_by_asc(TagColumn::Name)
            .offset(page.skip)
            .limit(page.limit_or(DEFAULT_PAGE_SIZE, self.content.max_page_size))
            .all(&self.db)
            .await?;
        Ok(tags)
    }
}

#[zel_service(name = "tags")]
trait Tags {
    #[doc = "Create a tag (superuser)"]
    #[method(name = "create_tag")]
    async fn create_tag(&self, input: NewTag) -> Result<TagModel, ResourceError>;

    #[doc = "Update a tag (superuser)"]
    #[method(name = "update_tag")]
    async fn update_tag(&self, id: TagId, changes: TagChanges) -> Result<TagModel, ResourceError>;

    #[doc = "Delete a tag attached to no posts (superuser)"]
    #[method(name = "delete_tag")]
    async fn delete_tag(&self, id: TagId) -> Result<(), ResourceError>;

    #[doc = "Get a tag by ID"]
    #[method(name = "get_tag")]
    async fn get_tag(&self, id: TagId) -> Result<TagModel, ResourceError>;

    #[doc = "Get a tag by slug"]
    #[method(name = "get_tag_by_slug")]
    async fn get_tag_by_slug(&self, slug: String) -> Result<TagModel, ResourceError>;

    #[doc = "List tags by name"]
    #[method(name = "list_tags")]
    async fn list_tags(&self, page: Page) -> Result<Vec<TagModel>, ResourceError>;
}

#[async_trait]
impl TagsServer for TagsService {
    async fn create_tag(
        &self,
        ctx: RequestContext,
        input: NewTag,
    ) -> Result<TagModel, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._create_tag(&principal, input).await?)
    }

    async fn update_tag(
        &self,
        ctx: RequestContext,
        id: TagId,
        changes: TagChanges,
    ) -> Result<TagModel, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_tag(&principal, id, changes).await?)
    }

    async fn delete_tag(&self, ctx: RequestContext, id: TagId) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._delete_tag(&principal, id).await?)
    }

    async fn get_tag(&self, _ctx: RequestContext, id: TagId) -> Result<TagModel, ResourceError> {
        Ok(self._get_tag(id).await?)
    }

    async fn get_tag_by_slug(
        &self,
        _ctx: RequestContext,
        slug: String,
    ) -> Result<TagModel, ResourceError> {
        Ok(self._get_tag_by_slug(&slug).await?)
    }

    async fn list_tags(
        &self,
        _ctx: RequestContext,
        page: Page,
    ) -> Result<Vec<TagModel>, ResourceError> {
        Ok(self._list_tags(page).await?)
    }
}
