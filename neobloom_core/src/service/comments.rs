use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    auth::Principal,
    config::ContentSettings,
    counters,
    entity::{comment, post, user},
    error::{BlogError, Resource},
    ids::{CommentId, PostId},
    integrity,
    service::{build_tree, caller, users::UserProfile, Page},
};

const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewComment {
    pub post_id: PostId,
    pub content: String,
    /// Set to reply to another comment on the same post.
    pub parent_id: Option<CommentId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CommentChanges {
    pub content: Option<String>,
    /// Only superusers may change moderation state.
    pub is_approved: Option<bool>,
}

/// A comment with its author and approved replies, oldest reply first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    pub comment: comment::Model,
    pub author: UserProfile,
    pub replies: Vec<CommentThread>,
}

/// Delete every comment in `roots` together with all replies below them.
pub(crate) async fn remove_subtrees<C, I>(conn: &C, roots: I) -> Result<u64, BlogError>
where
    C: ConnectionTrait,
    I: IntoIterator<Item = CommentId>,
{
    let mut doomed: BTreeSet<CommentId> = roots.into_iter().collect();
    let mut frontier: Vec<CommentId> = doomed.iter().copied().collect();

    while !frontier.is_empty() {
        let replies = comment::Entity::find()
            .filter(comment::Column::ParentId.is_in(frontier.iter().copied()))
            .all(conn)
            .await?;
        frontier = replies
            .into_iter()
            .map(|reply| reply.id)
            .filter(|id| doomed.insert(*id))
            .collect();
    }

    if doomed.is_empty() {
        return Ok(0);
    }
    let result = comment::Entity::delete_many()
        .filter(comment::Column::Id.is_in(doomed))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[derive(Clone)]
pub struct CommentsService {
    db: DatabaseConnection,
    content: ContentSettings,
}

impl CommentsService {
    pub fn new(db: DatabaseConnection, content: ContentSettings) -> Self {
        Self { db, content }
    }

    pub async fn _create_comment(
        &self,
        principal: &Principal,
        input: NewComment,
    ) -> Result<comment::Model, BlogError> {
        principal.require_verified()?;

        let txn = self.db.begin().await?;

        post::Entity::find_by_id(input.post_id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Post))?;
        if let Some(parent_id) = input.parent_id {
            integrity::validate_comment_parent(&txn, input.post_id, parent_id).await?;
        }

        let comment = comment::ActiveModel {
            id: Set(CommentId::new()),
            content: Set(input.content),
            is_approved: Set(true),
            like_count: Set(0),
            post_id: Set(input.post_id),
            user_id: Set(principal.user_id),
            parent_id: Set(input.parent_id),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let comment = comment::Entity::insert(comment)
            .exec_with_returning(&txn)
            .await?;

        txn.commit().await?;
        tracing::info!(comment_id = %comment.id, post_id = %comment.post_id, "created comment");
        Ok(comment)
    }

    pub async fn _update_comment(
        &self,
        principal: &Principal,
        id: CommentId,
        changes: CommentChanges,
    ) -> Result<comment::Model, BlogError> {
        if changes.is_approved.is_some() {
            principal.require_superuser()?;
        }

        let existing = self.find(id).await?;
        if !principal.can_modify(existing.user_id) {
            return Err(BlogError::Forbidden("only the author may change this comment"));
        }

        let mut active: comment::ActiveModel = existing.into();
        if let Some(content) = changes.content {
            active.content = Set(content);
        }
        if let Some(is_approved) = changes.is_approved {
            active.is_approved = Set(is_approved);
        }
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&self.db).await?)
    }

    /// Delete a comment and every reply beneath it.
    pub async fn _delete_comment(
        &self,
        principal: &Principal,
        id: CommentId,
    ) -> Result<(), BlogError> {
        let txn = self.db.begin().await?;

        let comment = comment::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(BlogError::NotFound(Resource::Comment))?;
        if !principal.can_modify(comment.user_id) {
            return Err(BlogError::Forbidden("only the author may delete this comment"));
        }
        let removed = remove_subtrees(&txn, [id]).await?;

        txn.commit().await?;
        tracing::info!(comment_id = %id, removed, "deleted comment thread");
        Ok(())
    }

    pub async fn _approve_comment(
        &self,
        principal: &Principal,
        id: CommentId,
    ) -> Result<comment::Model, BlogError> {
        principal.require_superuser()?;

        let mut active: comment::ActiveModel = self.find(id).await?.into();
        active.is_approved = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&self.db).await?)
    }

    pub async fn _like_comment(
        &self,
        principal: &Principal,
        id: CommentId,
    ) -> Result<comment::Model, BlogError> {
        principal.require_active()?;
        counters::increment_comment_likes(&self.db, id).await
    }

    /// Approved top-level comments of a post, newest first, each with its
    /// approved replies.
    pub async fn _list_comments(
        &self,
        post_id: PostId,
        page: Page,
    ) -> Result<Vec<CommentThread>, BlogError> {
        post::Entity::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Post))?;

        let limit = page.limit_or(DEFAULT_PAGE_SIZE, self.content.max_page_size);
        let roots = comment::Entity::find()
            .filter(comment::Column::PostId.eq(post_id))
            .filter(comment::Column::ParentId.is_null())
            .filter(comment::Column::IsApproved.eq(true))
            .order_by_desc(comment::Column::CreatedAt)
            .order_by_desc(comment::Column::Id)
            .offset(page.skip)
            .limit(limit)
            .all(&self.db)
            .await?;

        self.threads(roots, None).await
    }

    /// One comment with its approved replies.
    pub async fn _get_comment(&self, id: CommentId) -> Result<CommentThread, BlogError> {
        let comment = self.find(id).await?;
        let parent_id = comment.parent_id;

        self.threads(vec![comment], parent_id)
            .await?
            .pop()
            .ok_or(BlogError::NotFound(Resource::User))
    }

    async fn find(&self, id: CommentId) -> Result<comment::Model, BlogError> {
        comment::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(BlogError::NotFound(Resource::Comment))
    }

    /// Builds a thread for each of `roots`, which all hang off `parent`.
    /// Only the approved replies below those roots are loaded, oldest first
    /// at every level.
    async fn threads(
        &self,
        roots: Vec<comment::Model>,
        parent: Option<CommentId>,
    ) -> Result<Vec<CommentThread>, BlogError> {
        let mut seen: BTreeSet<CommentId> = roots.iter().map(|root| root.id).collect();
        let mut frontier: Vec<CommentId> = seen.iter().copied().collect();
        let mut comments = roots;

        while !frontier.is_empty() {
            let replies = comment::Entity::find()
                .filter(comment::Column::ParentId.is_in(frontier))
                .filter(comment::Column::IsApproved.eq(true))
                .order_by_asc(comment::Column::CreatedAt)
                .order_by_asc(comment::Column::Id)
                .all(&self.db)
                .await?;
            frontier = Vec::with_capacity(replies.len());
            for reply in replies {
                if seen.insert(reply.id) {
                    frontier.push(reply.id);
                    comments.push(reply);
                }
            }
        }

        let author_ids: BTreeSet<_> = comments.iter().map(|c| c.user_id).collect();
        let authors: HashMap<_, UserProfile> = user::Entity::find()
            .filter(user::Column::Id.is_in(author_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|author| (author.id, author.into()))
            .collect();

        let rows: Vec<(comment::Model, UserProfile)> = comments
            .into_iter()
            .filter_map(|comment| {
                let author = authors.get(&comment.user_id)?.clone();
                Some((comment, author))
            })
            .collect();

        Ok(build_tree(
            rows,
            parent,
            |(comment, _)| comment.id,
            |(comment, _)| comment.parent_id,
            |(comment, author), replies| CommentThread {
                comment,
                author,
                replies,
            },
        ))
    }
}

#[zel_service(name = "comments")]
trait Comments {
    #[doc = "Comment on a post or reply to a comment (verified users)"]
    #[method(name = "create_comment")]
    async fn create_comment(&self, input: NewComment) -> Result<comment::Model, ResourceError>;

    #[doc = "Edit a comment (author or superuser)"]
    #[method(name = "update_comment")]
    async fn update_comment(
        &self,
        id: CommentId,
        changes: CommentChanges,
    ) -> Result<comment::Model, ResourceError>;

    #[doc = "Delete a comment and its replies (author or superuser)"]
    #[method(name = "delete_comment")]
    async fn delete_comment(&self, id: CommentId) -> Result<(), ResourceError>;

    #[doc = "Approve a comment (superuser)"]
    #[method(name = "approve_comment")]
    async fn approve_comment(&self, id: CommentId) -> Result<comment::Model, ResourceError>;

    #[doc = "Like a comment"]
    #[method(name = "like_comment")]
    async fn like_comment(&self, id: CommentId) -> Result<comment::Model, ResourceError>;

    #[doc = "Approved comment threads of a post, newest first"]
    #[method(name = "list_comments")]
    async fn list_comments(
        &self,
        post_id: PostId,
        page: Page,
    ) -> Result<Vec<CommentThread>, ResourceError>;

    #[doc = "A comment with its replies"]
    #[method(name = "get_comment")]
    async fn get_comment(&self, id: CommentId) -> Result<CommentThread, ResourceError>;
}

#[async_trait]
impl CommentsServer for CommentsService {
    async fn create_comment(
        &self,
        ctx: RequestContext,
        input: NewComment,
    ) -> Result<comment::Model, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._create_comment(&principal, input).await?)
    }

    async fn update_comment(
        &self,
        ctx: RequestContext,
        id: CommentId,
        changes: CommentChanges,
    ) -> Result<comment::Model, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._update_comment(&principal, id, changes).await?)
    }

    async fn delete_comment(&self, ctx: RequestContext, id: CommentId) -> Result<(), ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._delete_comment(&principal, id).await?)
    }

    async fn approve_comment(
        &self,
        ctx: RequestContext,
        id: CommentId,
    ) -> Result<comment::Model, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._approve_comment(&principal, id).await?)
    }

    async fn like_comment(
        &self,
        ctx: RequestContext,
        id: CommentId,
    ) -> Result<comment::Model, ResourceError> {
        let principal = caller(&self.db, &ctx).await?;
        Ok(self._like_comment(&principal, id).await?)
    }

    async fn list_comments(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
        page: Page,
    ) -> Result<Vec<CommentThread>, ResourceError> {
        Ok(self._list_comments(post_id, page).await?)
    }

    async fn get_comment(
        &self,
        _ctx: RequestContext,
        id: CommentId,
    ) -> Result<CommentThread, ResourceError> {
        Ok(self._get_comment(id).await?)
    }
}
