use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "pipeline_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub request_id: String,
    pub stage: String, // generate_script / validate / execute / report
    pub attempt: i32,
    pub status: String, // QUEUED/CLAIMED/DONE/FAILED
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub delivery_count: i32,
    pub last_error: Option<String>,
    pub next_run_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
