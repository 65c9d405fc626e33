// SeaORM entities, one module per table.

pub mod category;
pub mod comment;
pub mod post;
pub mod post_tag;
pub mod session;
pub mod tag;
pub mod user;


pub mod prelude {
    // Re-export all entities for convenience
    pub use super::category::{
        ActiveModel as CategoryActiveModel, Column as CategoryColumn, Entity as Category,
        Model as CategoryModel,
    };
    pub use super::comment::{
        ActiveModel as CommentActiveModel, Column as CommentColumn, Entity as Comment,
        Model as CommentModel,
    };
    pub use super::post::{
        ActiveModel as PostActiveModel, Column as PostColumn, Entity as Post,
        Model as PostModel,
    };
    pub use super::post_tag::{
        ActiveModel as PostTagActiveModel, Column as PostTagColumn, Entity as PostTag,
        Model as PostTagModel,
    };
    pub use super::session::{
        ActiveModel as SessionActiveModel, Column as SessionColumn, Entity as Session,
        Model as SessionModel,
    };
    pub use super::tag::{
        ActiveModel as TagActiveModel, Column as TagColumn, Entity as Tag, Model as TagModel,
    };
    pub use super::user::{
        ActiveModel as UserActiveModel, Column as UserColumn, Entity as User,
        Model as UserModel,
    };

    // Re-export commonly used SeaORM types and traits
    pub use sea_orm::{
        ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, Database,
        DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, ModelTrait, NotSet,
        PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
        TransactionTrait,
    };
}
