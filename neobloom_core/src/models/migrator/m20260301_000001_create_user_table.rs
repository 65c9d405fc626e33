use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .col(pk_uuid(User::Id))
                    .col(string_uniq(User::Email))
                    .col(string_uniq(User::Username))
                    .col(string(User::HashedPassword))
                    .col(string_null(User::FullName))
                    .col(text_null(User::Bio))
                    .col(string_null(User::AvatarUrl))
                    .col(boolean(User::IsActive).default(true))
                    .col(boolean(User::IsSuperuser).default(false))
                    .col(boolean(User::IsVerified).default(false))
                    .col(string_null(User::VerificationToken))
                    .col(string_null(User::PasswordResetToken))
                    .col(timestamp_with_time_zone_null(User::PasswordResetExpires))
                    .col(timestamp_with_time_zone(User::CreatedAt))
                    .col(timestamp_with_time_zone_null(User::UpdatedAt))
                    .col(timestamp_with_time_zone_null(User::LastLogin))
                    .col(integer(User::LoginCount).default(0))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum User {
    Table,
    Id,
    Email,
    Username,
    HashedPassword,
    FullName,
    Bio,
    AvatarUrl,
    IsActive,
    IsSuperuser,
    IsVerified,
    VerificationToken,
    PasswordResetToken,
    PasswordResetExpires,
    CreatedAt,
    UpdatedAt,
    LastLogin,
    LoginCount,
}
