use sea_orm_migration::prelude::*;

mod m20260301_000001_create_user_table;
mod m20260301_000002_create_session_table;
mod m20260301_000003_create_category_table;
mod m20260301_000004_create_tag_table;
mod m20260301_000005_create_post_table;
mod m20260301_000006_create_post_tag_table;
mod m20260301_000007_create_comment_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_user_table::Migration),
            Box::new(m20260301_000002_create_session_table::Migration),
            Box::new(m20260301_000003_create_category_table::Migration),
            Box::new(m20260301_000004_create_tag_table::Migration),
            Box::new(m20260301_000005_create_post_table::Migration),
            Box::new(m20260301_000006_create_post_tag_table::Migration),
            Box::new(m20260301_000007_create_comment_table::Migration),
        ]
    }
}

#[cfg(test)]
use sea_orm::{Database, DbErr};

#[tokio::test]
async fn test_migrations_okay() -> Result<(), DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    let schema_manager = SchemaManager::new(&db);

    Migrator::refresh(&db).await?;

    for table in ["user", "session", "category", "tag", "post", "post_tag", "comment"] {
        assert!(schema_manager.has_table(table).await?, "missing table {table}");
    }

    assert!(schema_manager.has_column("post", "reading_time").await?);
    assert!(schema_manager.has_column("comment", "parent_id").await?);

    Ok(())
}
