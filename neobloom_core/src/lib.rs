use std::{sync::Arc, time::Duration};

use zel_core::{prelude::RpcServerBuilder, IrohBundle};

use crate::{
    auth::{Argon2Hasher, PasswordHasher},
    service::{
        categories::{CategoriesServer, CategoriesService},
        comments::{CommentsServer, CommentsService},
        posts::{PostsServer, PostsService},
        tags::{TagsServer, TagsService},
        users::{UsersServer, UsersService},
    },
};

pub mod auth;
pub mod config;
pub mod counters;
pub mod entity;
pub mod error;
pub mod ids;
pub mod integrity;
pub mod models;
pub mod seed;
pub mod service;
pub mod slug;

#[cfg(test)]
pub(crate) mod test_utils;

pub static ALPN: &[u8] = b"neobloom::0.1.0";

/// Main runtime handle for NeoBloom.
pub struct NeoBloomCore {
    pub config: config::NeoBloomConfig,

    /// Server bundle that accepts inbound RPC traffic.
    pub server: IrohBundle,
}

impl NeoBloomCore {
    pub async fn start(config: config::NeoBloomConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut server_builder = IrohBundle::builder(Some(config.secret_key.clone())).await?;
        let server_endpoint = server_builder.endpoint().clone();

        // DB + migrations
        let db = models::open_or_create_db(&config).await?;
        models::migrate_up(&db).await?;

        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new());
        seed::run(&db, &config, hasher.as_ref()).await?;

        let users = UsersService::new(db.clone(), config.auth, config.content, hasher);
        let categories = CategoriesService::new(db.clone(), config.content);
        let tags = TagsService::new(db.clone(), config.content);
        let posts = PostsService::new(db.clone(), config.content);
        let comments = CommentsService::new(db.clone(), config.content);

        // Register RPC servers
        let rpc_server_builder = RpcServerBuilder::new(ALPN, server_endpoint.clone());
        let rpc_server_builder = users.register_service(rpc_server_builder);
        let rpc_server_builder = categories.register_service(rpc_server_builder);
        let rpc_server_builder = tags.register_service(rpc_server_builder);
        let rpc_server_builder = posts.register_service(rpc_server_builder);
        let rpc_server_builder = comments.register_service(rpc_server_builder);

        let rpc_server = rpc_server_builder.build();

        let server = server_builder.accept(ALPN, rpc_server).finish().await;

        server.wait_online().await;
        tracing::info!(node_id = %server.endpoint.id(), "neobloom online");

        Ok(Self { config, server })
    }

    pub async fn shutdown(self) -> Result<(), Box<dyn std::error::Error>> {
        self.server.shutdown(Duration::from_secs(5)).await?;
        Ok(())
    }
}

pub mod prelude {
    pub use super::auth::Principal;
    pub use super::config;
    pub use super::entity;
    pub use super::error::{BlogError, Resource};
    pub use super::ids;
    pub use super::models;
    pub use super::service;
    pub use super::NeoBloomCore;

    pub use zel_core;
}
