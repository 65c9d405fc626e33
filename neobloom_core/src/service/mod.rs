use std::{collections::HashMap, hash::Hash};

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use zel_core::prelude::RequestContext;

use crate::{
    auth::{self, Principal},
    error::BlogError,
};

pub mod categories;
pub mod comments;
pub mod posts;
pub mod tags;
pub mod users;

/// Offset pagination for list operations. `limit` falls back to the
/// operation's default and is clamped to the configured maximum.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Page {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }

    pub(crate) fn limit_or(&self, default: u64, max: u64) -> u64 {
        self.limit.unwrap_or(default).clamp(1, max.max(1))
    }
}

/// Update to a nullable reference such as a post's category.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassign<T> {
    Keep,
    Clear,
    To(T),
}

impl<T> Default for Reassign<T> {
    fn default() -> Self {
        Reassign::Keep
    }
}

impl<T: Copy> Reassign<T> {
    /// The value after applying this change to `current`.
    pub(crate) fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            Reassign::Keep => current,
            Reassign::Clear => None,
            Reassign::To(value) => Some(*value),
        }
    }
}

/// Groups flat rows under their parents and returns the children of `root`.
///
/// Sibling order follows the order of `rows`. Rows that cannot be reached
/// from `root`, including members of a parent cycle, are left out.
pub(crate) fn build_tree<T, K, N>(
    rows: Vec<T>,
    root: Option<K>,
    id: impl Fn(&T) -> K,
    parent: impl Fn(&T) -> Option<K>,
    node: impl Fn(T, Vec<N>) -> N,
) -> Vec<N>
where
    K: Hash + Eq + Copy,
{
    let mut children: HashMap<Option<K>, Vec<T>> = HashMap::new();
    for row in rows {
        children.entry(parent(&row)).or_default().push(row);
    }
    attach(&mut children, root, &id, &node)
}

fn attach<T, K, N>(
    children: &mut HashMap<Option<K>, Vec<T>>,
    key: Option<K>,
    id: &impl Fn(&T) -> K,
    node: &impl Fn(T, Vec<N>) -> N,
) -> Vec<N>
where
    K: Hash + Eq + Copy,
{
    let rows = children.remove(&key).unwrap_or_default();
    rows.into_iter()
        .map(|row| {
            let kids = attach(children, Some(id(&row)), id, node);
            node(row, kids)
        })
        .collect()
}

pub(crate) fn node_id(ctx: &RequestContext) -> String {
    ctx.connection().remote_id().to_string()
}

/// Resolves the principal behind an RPC call.
pub(crate) async fn caller(
    db: &DatabaseConnection,
    ctx: &RequestContext,
) -> Result<Principal, BlogError> {
    auth::resolve_principal(db, &node_id(ctx)).await
}
