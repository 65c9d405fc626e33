use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, Func, SimpleExpr},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    Value,
};
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    auth::Principal,
    config::ContentSettings,
    counters,
    entity::{category, comment, post, post_tag, tag, user},
    error::{BlogError, Resource},
    ids::{CategoryId, PostId, TagId, UserId},
    integrity, slug,
    service::{caller, users::UserProfile, Page, Reassign},
};

const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub slug: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    pub featured_image: Option<String>,
    pub is_published: bool,
    pub is_featured: bool,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub category_id: Option<CategoryId>,
    pub tag_ids: Vec<TagId>,
}

impl NewPost {
    /// A published post with nothing but a title and body.
    pub fn titled(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: None,
            content: content.into(),
            summary: None,
            featured_image: None,
            is_published: true,
            is_featured: false,
            meta_title: None,
            meta_description: None,
            meta_keywords: None,
            category_id: None,
            tag_ids: Vec::new(),
        }
    }
}

/// `None` leaves a field unchanged; `tag_ids: Some(..)` replaces the whole set.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    /// Empty keeps the current slug.
    pub slug: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub featured_image: Option<String>,
    pub is_published: Option<bool>,
    pub is_featured: Option<bool>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category_id: Reassign<CategoryId>,
    pub tag_ids: Option<Vec<TagId>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PostFilter {
    pub category_id: Option<CategoryId>,
    pub tag_id: Option<TagId>,
    pub author_id: Option<UserId>,
    /// Substring of the title, content or summary.
    pub search: Option<String>,
    pub published_only: bool,
}

impl Default for PostFilter {
    fn default() -> Self {
        Self {
            category_id: None,
            tag_id: None,
            author_id: None,
            search: None,
            published_only: true,
        }
    }
}

/// A post with its author, category and tags resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    pub post: post::Model,
    pub author: UserProfile,
    pub category: Option<category::Model>,
    pub tags: Vec<tag::Model>,
}

/// Minutes needed to read `content`, rounded half to even and never below one.
pub fn reading_time(content: &str, words_per_minute: u32) -> i32 {
    let words = content
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .count() as u64;
    let per_minute = u64::from(words_per_minute.max(1));

    let (quotient, remainder) = (words / per_minute, words % per_minute);
    let minutes = match (2 * remainder).cmp(&per_minute) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + quotient % 2,
    };
    i32::try_from(minutes.max(1)).unwrap_or(i32::MAX)
}

/// Delete `post` with its comments and tag links, then recount the category
/// and tags it was filed under.
pub(crate) async fn remove_post<C: ConnectionTrait>(
    conn: &C,
    post: &post::Model,
) -> Result<(), BlogError> {
    let tag_ids = linked_tags(conn, post.id).await?;

    comment::Entity::delete_many()
        .filter(comment::Column::PostId.eq(post.id))
        .exec(conn)
        .await?;
    post_tag::Entity::delete_many()
        .filter(post_tag::Column::PostId.eq(post.id))
        .exec(conn)
        .await?;
    post::Entity::delete_by_id(post.id).exec(conn).await?;

    if let Some(category_id) = post.category_id {
        counters::recount_category(conn, category_id).await?;
    }
    counters::recount_tags(conn, tag_ids).await?;
    Ok(())
}

/// `LOWER(post.column) LIKE pattern`, so matching ignores case on every backend.
fn lower_like(column: post::Column, pattern: &str) -> SimpleExpr {
    Expr::expr(Func::lower(Expr::col((post::Entity, column)))).like(pattern)
}

async fn linked_tags<C: ConnectionTrait>(
    conn: &C,
    post_id: PostId,
) -> Result<BTreeSet<TagId>, BlogError> {
    Ok(post_tag::Entity::find()
        .filter(post_tag::Column::PostId.eq(post_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|link| link.tag_id)
        .collect())
}

/// Every id in `ids` must name an existing tag.
async fn existing_tags<C: ConnectionTrait>(
    conn: &C,
    ids: &[TagId],
) -> Result<BTreeSet<TagId>, BlogError> {
    let wanted: BTreeSet<TagId> = ids.iter().copied().collect();
    if wanted.is_empty() {
        return Ok(wanted);
    }

    let found = tag::Entity::find()
        .filter(tag::Column::Id.is_in(wanted.iter().copied()))
        .count(conn)
        .await?;
    if found != wanted.len() as u64 {
        return Err(BlogError::NotFound(Resource::Tag));
    }
    Ok(wanted)
}

async fn ensure_category<C: ConnectionTrait>(conn: &C, id: CategoryId) -> Result<(), BlogError> {
    category::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::Category))?;
    Ok(())
}

async fn link_tags<C: ConnectionTrait>(
    conn: &C,
    post_id: PostId,
    tag_ids: &BTreeSet<TagId>,
) -> Result<(), BlogError> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let links = tag_ids.iter().map(|tag_id| post_tag::ActiveModel {
        post_id: Set(post_id),
        tag_id: Set(*tag_id),
    });
    post_tag::Entity::insert_many(links)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn load_detail<C: ConnectionTrait>(
    conn: &C,
    post: post::Model,
) -> Result<PostDetail, BlogError> {
    let author = user::Entity::find_by_id(post.author_id)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::User))?;

    let category = match post.category_id {
        Some(id) => category::Entity::find_by_id(id).one(conn).await?,
        None => None,
    };

    let tags = post
        .find_related(tag::Entity)
        .order_by_asc(tag::Column::Name)
        .all(conn)
        .await?;

    Ok(PostDetail {
        post,
        author: author.into(),
        category,
        tags,
    })
}

#[derive(Clone)]
pub struct PostsService {
    db: DatabaseConnection,
    content: ContentSettings,
}

impl PostsService {
    pub fn new(db: DatabaseConnection, content: ContentSettings) -> Self {
        Self { db, content }
    }

    /// Create a post authored by `principal`. Category and tag counts are
    /// recomputed before the transaction commits.
    pub async fn _create_post(
        &self,
        principal: &Principal,
        input: NewPost,
    ) -> Result<PostDetail, BlogError> {
        principal.require_verified()?;
        let slug = slug::assign(input.slug.as_deref(), &input.title)?;
        let reading_time = reading_time(&input.content, self.content.words_per_minute);
        let now = Utc::now();

        let txn = self.db.begin().await?;

        integrity::ensure_unique::<post::Entity, _>(&txn, post::Column::Slug, &slug, None, "post")
            .await?;
        if let Some(category_id) = input.category_id {
            ensure_category(&txn, category_id).await?;
        }
        let tag_ids = existing_tags(&txn, &input.tag_ids).await?;

        let post = post::ActiveModel {
            id: Set(PostId::new()),
            meta_title: Set(input.meta_title.or_else(|| Some(input.title.clone()))),
            meta_description: Set(input.meta_description.or_else(|| input.summary.clone())),
            title: Set(input.title),
            slug: Set(slug),
            content: Set(input.content),
            summary: Set(input.summary),
            featured_image: Set(input.featured_image),
            is_published: Set(input.is_published),
            is_featured: Set(input.is_featured),
            view_count: Set(0),
            like_count: Set(0),
            reading_time: Set(reading_time),
            meta_keywords: Set(input.meta_keywords),
            published_at: Set(input.is_published.then_some(now)),
            created_at: Set(now),
            updated_at: Set(None),
            author_id: Set(principal.user_id),
            category_id: Set(input.category_id),
        };
        let post = post::Entity::insert(post).exec_with_returning(&txn).await?;
        link_tags(&txn, post.id, &tag_ids).await?;

        if let Some(category_id) = post.category_id {
            counters::recount_category(&txn, category_id).await?;
        }
        counters::recount_tags(&txn, tag_ids).await?;

        let detail = load_detail(&txn, post).await?;
        txn.commit().await?;
        tracing::info!(post_id = %detail.post.id, slug = %detail.post.slug, "created post");
        Ok(detail)
    }

    pub async fn _update_post(
        &self,
        principal: &Principal,
        id: PostId,
        changes: PostChanges,
    ) -> Result<PostDetail, BlogError> {
        principal.require_verified()?;

        let txn = self.db.begin().await?;

        let existing = post::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Post))?;
        if !principal.can_modify(existing.author_id) {
            return Err(BlogError::Forbidden("only the author may change this post"));
        }

        let new_slug = match changes.slug.as_deref().filter(|s| !s.is_empty()) {
            Some(explicit) => {
                let title = changes.title.as_deref().unwrap_or(&existing.title);
                let slug = slug::assign(Some(explicit), title)?;
                integrity::ensure_unique::<post::Entity, _>(
                    &txn,
                    post::Column::Slug,
                    &slug,
                    Some((post::Column::Id, Value::from(id))),
                    "post",
                )
                .await?;
                Some(slug)
            }
            None => None,
        };

        let old_category = existing.category_id;
        let new_category = changes.category_id.apply(old_category);
        if let (Reassign::To(category_id), true) =
            (changes.category_id, new_category != old_category)
        {
            ensure_category(&txn, category_id).await?;
        }

        let new_tags = match &changes.tag_ids {
            Some(ids) => Some(existing_tags(&txn, ids).await?),
            None => None,
        };

        let publishing = changes.is_published == Some(true) && !existing.is_published;
        let published_at = match changes.published_at {
            Some(at) => Some(at),
            None if publishing => Some(Utc::now()),
            None => existing.published_at,
        };

        let mut active: post::ActiveModel = existing.into();
        if let Some(title) = changes.title {
            active.title = Set(title);
        }
        if let Some(slug) = new_slug {
            active.slug = Set(slug);
        }
        if let Some(content) = changes.content {
            active.reading_time = Set(reading_time(&content, self.content.words_per_minute));
            active.content = Set(content);
        }
        if let Some(summary) = changes.summary {
            active.summary = Set(Some(summary));
        }
        if let Some(featured_image) = changes.featured_image {
            active.featured_image = Set(Some(featured_image));
        }
        if let Some(is_published) = changes.is_published {
            active.is_published = Set(is_published);
        }
        if let Some(is_featured) = changes.is_featured {
            active.is_featured = Set(is_featured);
        }
        if let Some(meta_title) = changes.meta_title {
            active.meta_title = Set(Some(meta_title));
        }
        if let Some(meta_description) = changes.meta_description {
            active.meta_description = Set(Some(meta_description));
        }
        if let Some(meta_keywords) = changes.meta_keywords {
            active.meta_keywords = Set(Some(meta_keywords));
        }
        active.published_at = Set(published_at);
        active.category_id = Set(new_category);
        active.updated_at = Set(Some(Utc::now()));
        let post = active.update(&txn).await?;

        if let Some(new_tags) = new_tags {
            let old_tags = linked_tags(&txn, id).await?;
            post_tag::Entity::delete_many()
                .filter(post_tag::Column::PostId.eq(id))
                .exec(&txn)
                .await?;
            link_tags(&txn, id, &new_tags).await?;
            counters::recount_tags(&txn, old_tags.union(&new_tags).copied()).await?;
        }
        counters::recount_category_change(&txn, old_category, new_category).await?;

        let detail = load_detail(&txn, post).await?;
        txn.commit().await?;
        tracing::info!(post_id = %id, "updated post");
        Ok(detail)
    }

    pub async fn _delete_post(&self, principal: &Principal, id: PostId) -> Result<(), BlogError> {
        principal.require_verified()?;

        let txn = self.db.begin().await?;

        let post = post::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Post))?;
        if !principal.can_modify(post.author_id) {
            return Err(BlogError::Forbidden("only the author may delete this post"));
        }
        remove_post(&txn, &post).await?;

        txn.commit().await?;
        tracing::info!(post_id = %id, "deleted post");
        Ok(())
    }

    /// Read a post by slug, counting the read as a view.
    pub async fn _record_post_view(&self, slug: &str) -> Result<PostDetail, BlogError> {
        let txn = self.db.begin().await?;

        let post = counters::increment_post_views(&txn, slug).await?;

        let detail = load_detail(&txn, post).await?;
        txn.commit().await?;
        Ok(detail)
    }

    pub async fn _like_post(
        &self,
        principal: &Principal,
        id: PostId,
    ) -> Result<post::Model, BlogError> {
        principal.require_active()?;
        counters::increment_post_likes(&self.db, id).await
    }

    /// Newest published first. Posts that were never published sort last.
    pub async fn _list_posts(
        &self,
        filter: PostFilter,
        page: Page,
    ) -> Result<Vec<PostDetail>, BlogError> {
        let mut query = post::Entity::find();

        if filter.published_only {
            query = query.filter(post::Column::IsPublished.eq(true));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(post::Column::CategoryId.eq(category_id));
        }
        if let Some(tag_id) = filter.tag_id {
            query = query
                .inner_join(post_tag::Entity)
                .filter(post_tag::Column::TagId.eq(tag_id));
        }
        if let Some(author_id) = filter.author_id {
            query = query.filter(post::Column::AuthorId.eq(author_id));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            query = query.filter(
                Condition::any()
                    .add(lower_like(post::Column::Title, &pattern))
                    .add(lower_like(post::Column::Content, &pattern))
                    .add(lower_like(post::Column::Summary, &pattern)),
            );
        }

        let posts = query
            .order_by_desc(post::Column::PublishedAt)
            .order_by_desc(post::Column::CreatedAt)
            .offset(page.skip)
            .limit(page.limit_or(DEFAULT_PAGE_SIZE, self.content.max_page_size))
            .all(&self.db)
            .await?;

        let mut details = Vec::with_capacity(posts.len());
        for post in posts {
            details.push(load_detail(&self.db, post).await?);
        }
        Ok(details)
    }
}

#[zel_service(name = "posts")]
trait Posts {
    #[doc = "Create a post (verified users)"]
    #[method(name = "create_post")]
    async fn create_post(&self, input: NewPost) -> Result<PostDetail, ResourceError>;

    #[doc = "Update a post (author or superuser)"]
    #[method(name = "update_post")]
    async fn update_post(
        &self,
        id: PostId,
        changes: PostChanges,
    ) -> Result<PostDetail, ResourceError>;

    #[doc = "Delete a post with its comments (author or superuser)"]
    #[method(name = "delete_post")]
    async fn delete_post(&self, id: PostId) -> Result<(), ResourceError>;

    #[doc = "Read a post by slug and record a view"]
    #[method(name = "get_post")]
    async fn get_post(&self, slug: String) -> Result<PostDetail, ResourceError>;

    #[doc = "Like a post"]
    #[method(name = "like_post")]
    async fn like_post(&self, id: PostId) -> Result<post::Model, ResourceError>;

    #[doc = "List posts, newest first"]
    #[method(name = "list_posts")]
    async fn list_posts(
        &self,
        filter: PostFilter,
        page: Page,
    ) -> Result<Vec<PostDetail>, ResourceError>;
}

#[async_trait]
impl PostsServer for PostsService {
    async fn create_post(
        &self,
        ctx: RequestContext,
        input: NewPost,
    ) -> Result<PostDetail, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._create_post(&principal, input).await?)
    }

    async fn update_post(
        &self,
        ctx: RequestContext,
        id: PostId,
        changes: PostChanges,
    ) -> Result<PostDetail, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_post(&principal, id, changes).await?)
    }

    async fn delete_post(&self, ctx: RequestContext, id: PostId) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._delete_post(&principal, id).await?)
    }

    async fn get_post(
        &self,
        _ctx: RequestContext,
        slug: String,
    ) -> Result<PostDetail, ResourceError> {
        Ok(self._record_post_view(&slug).await?)
    }

    async fn like_post(
        &self,
        ctx: RequestContext,
        id: PostId,
    ) -> Result<post::Model, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._like_post(&principal, id).await?)
    }

    async fn list_posts(
        &self,
        _ctx: RequestContext,
        filter: PostFilter,
        page: Page,
    ) -> Result<Vec<PostDetail>, ResourceError> {
        Ok(self._list_posts(filter, page).await?)
    }
}
