//! Codebase entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "codebases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub host: String,
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
    /// Last time the scheduler enqueued or skipped a refresh.
    pub last_refresh_checked_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::analysis::Entity")]
    Analyses,
}

impl Related<super::analysis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Analyses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::Codebase {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            host: model.host,
            owner: model.owner,
            name: model.name,
            default_branch: model.default_branch,
        }
    }
}
