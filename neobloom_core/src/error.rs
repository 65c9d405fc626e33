use std::fmt;

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zel_core::prelude::ResourceError;

/// The kind of row a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    User,
    Category,
    ParentCategory,
    Tag,
    Post,
    Comment,
    ParentComment,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::User => "user",
            Resource::Category => "category",
            Resource::ParentCategory => "parent category",
            Resource::Tag => "tag",
            Resource::Post => "post",
            Resource::Comment => "comment",
            Resource::ParentComment => "parent comment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("inactive user")]
    InactiveUser,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("slug is empty after normalization")]
    EmptySlug,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl BlogError {
    pub(crate) fn conflict(what: &str, field: &str, value: &str) -> Self {
        BlogError::Conflict(format!("a {what} with {field} '{value}' already exists"))
    }
}

impl From<BlogError> for ResourceError {
    fn from(error: BlogError) -> Self {
        match error {
            BlogError::DbError(error) => ResourceError::infra(error),
            other => ResourceError::app(other),
        }
    }
}
