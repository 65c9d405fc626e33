//! Reference and hierarchy checks that run before a mutation is persisted.
//!
//! Every check takes the caller's connection so it can run inside the
//! mutation's transaction.

use std::collections::HashSet;

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, IdenStatic, PaginatorTrait, QueryFilter, Value,
};

use crate::{
    entity::{category, comment, post, post_tag},
    error::{BlogError, Resource},
    ids::{CategoryId, CommentId, PostId, TagId},
};

/// Fails with `Conflict` when another row of `E` already holds `value` in `column`.
///
/// `exclude` is the primary key of the row being updated, if any.
pub(crate) async fn ensure_unique<E, C>(
    conn: &C,
    column: E::Column,
    value: &str,
    exclude: Option<(E::Column, Value)>,
    what: &str,
) -> Result<(), BlogError>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let mut query = E::find().filter(column.eq(value));
    if let Some((id_column, id)) = exclude {
        query = query.filter(id_column.ne(id));
    }

    if query.one(conn).await?.is_some() {
        let field = column.as_str().to_owned();
        return Err(BlogError::conflict(what, &field, value));
    }
    Ok(())
}

/// Checks that `candidate` may become the parent of `category_id`.
///
/// Rejects self-parenting, unknown parents and any candidate whose ancestor
/// chain already passes through `category_id`.
pub(crate) async fn validate_category_parent<C: ConnectionTrait>(
    conn: &C,
    category_id: CategoryId,
    candidate: CategoryId,
) -> Result<category::Model, BlogError> {
    if candidate == category_id {
        return Err(BlogError::InvalidReference(
            "category cannot be its own parent".to_string(),
        ));
    }

    let parent = category::Entity::find_by_id(candidate)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::ParentCategory))?;

    let mut seen = HashSet::from([candidate]);
    let mut next = parent.parent_id;
    while let Some(ancestor_id) = next {
        if ancestor_id == category_id {
            return Err(BlogError::InvalidReference(format!(
                "category {category_id} is an ancestor of {candidate}"
            )));
        }
        // A cycle that does not involve `category_id` is not ours to report.
        if !seen.insert(ancestor_id) {
            break;
        }
        next = match category::Entity::find_by_id(ancestor_id).one(conn).await? {
            Some(ancestor) => ancestor.parent_id,
            None => None,
        };
    }

    Ok(parent)
}

/// Checks that `candidate` exists and belongs to `post_id`.
pub(crate) async fn validate_comment_parent<C: ConnectionTrait>(
    conn: &C,
    post_id: PostId,
    candidate: CommentId,
) -> Result<comment::Model, BlogError> {
    let parent = comment::Entity::find_by_id(candidate)
        .one(conn)
        .await?
        .ok_or(BlogError::NotFound(Resource::ParentComment))?;

    if parent.post_id != post_id {
        return Err(BlogError::InvalidReference(
            "parent comment belongs to a different post".to_string(),
        ));
    }
    Ok(parent)
}

pub(crate) async fn validate_category_deletable<C: ConnectionTrait>(
    conn: &C,
    id: CategoryId,
) -> Result<(), BlogError> {
    let owned = post::Entity::find()
        .filter(post::Column::CategoryId.eq(id))
        .count(conn)
        .await?;

    if owned > 0 {
        return Err(BlogError::Conflict(format!(
            "cannot delete category with {owned} existing posts"
        )));
    }
    Ok(())
}

pub(crate) async fn validate_tag_deletable<C: ConnectionTrait>(
    conn: &C,
    id: TagId,
) -> Result<(), BlogError> {
    let owned = post_tag::Entity::find()
        .filter(post_tag::Column::TagId.eq(id))
        .count(conn)
        .await?;

    if owned > 0 {
        return Err(BlogError::Conflict(format!(
            "cannot delete tag with {owned} existing posts"
        )));
    }
    Ok(())
}
