use sea_orm_migration::{prelude::*, schema::*};

use super::m20260301_000001_create_user_table::User;
use super::m20260301_000003_create_category_table::Category;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Post::Table)
                    .col(pk_uuid(Post::Id))
                    .col(string(Post::Title))
                    .col(string_uniq(Post::Slug))
                    .col(text(Post::Content))
                    .col(text_null(Post::Summary))
                    .col(string_null(Post::FeaturedImage))
                    .col(boolean(Post::IsPublished).default(false))
                    .col(boolean(Post::IsFeatured).default(false))
                    .col(integer(Post::ViewCount).default(0))
                    .col(integer(Post::LikeCount).default(0))
                    .col(integer(Post::ReadingTime).default(0))
                    .col(string_null(Post::MetaTitle))
                    .col(text_null(Post::MetaDescription))
                    .col(string_null(Post::MetaKeywords))
                    .col(timestamp_with_time_zone_null(Post::PublishedAt))
                    .col(timestamp_with_time_zone(Post::CreatedAt))
                    .col(timestamp_with_time_zone_null(Post::UpdatedAt))
                    .col(uuid(Post::AuthorId))
                    .col(uuid_null(Post::CategoryId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-post-author_id")
                            .from(Post::Table, Post::AuthorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-post-category_id")
                            .from(Post::Table, Post::CategoryId)
                            .to(Category::Table, Category::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_post_category_id")
                    .table(Post::Table)
                    .col(Post::CategoryId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_post_author_id")
                    .table(Post::Table)
                    .col(Post::AuthorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_post_published_at")
                    .table(Post::Table)
                    .col(Post::PublishedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Post::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Post {
    Table,
    Id,
    Title,
    Slug,
    Content,
    Summary,
    FeaturedImage,
    IsPublished,
    IsFeatured,
    ViewCount,
    LikeCount,
    ReadingTime,
    MetaTitle,
    MetaDescription,
    MetaKeywords,
    PublishedAt,
    CreatedAt,
    UpdatedAt,
    AuthorId,
    CategoryId,
}
