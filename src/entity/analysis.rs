//! Analysis entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "analyses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub commit_sha: String,
    pub branch_name: Option<String>,
    /// One of `running`, `completed`, `failed`.
    pub status: String,
    pub started_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
    pub error_message: Option<String>,
    pub total_suites: i32,
    pub total_tests: i32,
    pub requested_by: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::codebase::Entity",
        from = "Column::CodebaseId",
        to = "super::codebase::Column::Id",
        on_delete = "Cascade"
    )]
    Codebase,
    #[sea_orm(has_many = "super::test_suite::Entity")]
    TestSuites,
}

impl Related<super::codebase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Codebase.def()
    }
}

impl Related<super::test_suite::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestSuites.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
