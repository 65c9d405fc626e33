use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Category::Table)
                    .col(pk_uuid(Category::Id))
                    .col(string_uniq(Category::Name))
                    .col(string_uniq(Category::Slug))
                    .col(text_null(Category::Description))
                    .col(string_null(Category::Icon))
                    .col(string_null(Category::Color))
                    .col(uuid_null(Category::ParentId)) // For subcategories
                    .col(integer(Category::PostCount).default(0))
                    .col(timestamp_with_time_zone(Category::CreatedAt))
                    .col(timestamp_with_time_zone_null(Category::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-category-parent_id")
                            .from(Category::Table, Category::ParentId)
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
                    .name("idx_category_parent_id")
                    .table(Category::Table)
                    .col(Category::ParentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Category::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Category {
    Table,
    Id,
    Name,
    Slug,
    Description,
    Icon,
    Color,
    ParentId,
    PostCount,
    CreatedAt,
    UpdatedAt,
}
