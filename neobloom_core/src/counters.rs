//! Denormalized counters.
//!
//! `post_count` on categories and tags is always recomputed from the rows
//! that exist right now. View and like counters only ever move up by one, in
//! a single `UPDATE` so concurrent increments are not lost.

use std::collections::BTreeSet;

use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
};

use crate::{
    entity::{category, comment, post, post_tag, tag},
    error::{BlogError, Resource},
    ids::{CategoryId, CommentId, PostId, TagId},
};

fn clamp_count(count: u64) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// Sets `category.post_count` to the number of posts filed under it.
pub(crate) async fn recount_category<C: ConnectionTrait>(
    conn: &C,
    id: CategoryId,
) -> Result<(), BlogError> {
    let count = post::Entity::find()
        .filter(post::Column::CategoryId.eq(id))
        .count(conn)
        .await?;

    let result = category::Entity::update_many()
        .col_expr(category::Column::PostCount, Expr::value(clamp_count(count)))
        .filter(category::Column::Id.eq(id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        tracing::debug!(category_id = %id, "category is gone, skipping recount");
    } else {
        tracing::debug!(category_id = %id, count, "recounted category posts");
    }
    Ok(())
}

/// Recounts both sides of a category move. Nothing happens when they match.
pub(crate) async fn recount_category_change<C: ConnectionTrait>(
    conn: &C,
    old: Option<CategoryId>,
    new: Option<CategoryId>,
) -> Result<(), BlogError> {
    if old == new {
        return Ok(());
    }
    for id in [old, new].into_iter().flatten() {
        recount_category(conn, id).await?;
    }
    Ok(())
}

/// Sets `tag.post_count` for every tag in `ids` to its number of post links.
pub(crate) async fn recount_tags<C, I>(conn: &C, ids: I) -> Result<(), BlogError>
where
    C: ConnectionTrait,
    I: IntoIterator<Item = TagId>,
{
    let ids: BTreeSet<TagId> = ids.into_iter().collect();

    for id in ids {
        let count = post_tag::Entity::find()
            .filter(post_tag::Column::TagId.eq(id))
            .count(conn)
            .await?;

        let result = tag::Entity::update_many()
            .col_expr(tag::Column::PostCount, Expr::value(clamp_count(count)))
            .filter(tag::Column::Id.eq(id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            tracing::debug!(tag_id = %id, "tag is gone, skipping recount");
        } else {
            tracing::debug!(tag_id = %id, count, "recounted tag posts");
        }
    }
    Ok(())
}

/// Counts a read of the post with `slug`. The increment is the first
/// statement so a surrounding transaction takes the write lock up front.
pub(crate) async fn increment_post_views<C: ConnectionTrait>(
    conn: &C,
    slug: &str,
) -> Result<post::Model, BlogError> {
    bump_post(conn, post::Column::Slug.eq(slug), post::Column::ViewCount).await
}

pub(crate) async fn increment_post_likes<C: ConnectionTrait>(
    conn: &C,
    id: PostId,
) -> Result<post::Model, BlogError> {
    bump_post(conn, post::Column::Id.eq(id), post::Column::LikeCount).await
}

async fn bump_post<C: ConnectionTrait>(
    conn: &C,
    target: SimpleExpr,
    column: post::Column,
) -> Result<post::Model, BlogError> {
    let result = post::Entity::update_many()
        .col_expr(column, Expr::col(column).add(1))
        .filter(target.clone())
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(BlogError::NotFound(Resource::Post));
    }

    post::Entity::find()
        .filter(target)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::Post))
}

pub(crate) async fn increment_comment_likes<C: ConnectionTrait>(
    conn: &C,
    id: CommentId,
) -> Result<comment::Model, BlogError> {
    let result = comment::Entity::update_many()
        .col_expr(
            comment::Column::LikeCount,
            Expr::col(comment::Column::LikeCount).add(1),
        )
        .filter(comment::Column::Id.eq(id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(BlogError::NotFound(Resource::Comment));
    }

    comment::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::Comment))
}
