use crate::backtest::status::BacktestStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "backtest_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub instrument_symbol: String,
    pub from_date: Date,
    pub to_date: Date,
    pub strategy_description: String,
    pub strategy_title: Option<String>,
    pub status: BacktestStatus,
    pub error_message: Option<String>,
    pub ready_for_report: bool,
    pub generated_report: bool,
    pub script_url: Option<String>,
    pub validation_data_url: Option<String>,
    pub full_data_url: Option<String>,
    pub log_url: Option<String>,
    pub report_url: Option<String>,
    pub preview_image_url: Option<String>,
    pub share_id: Option<String>,
    pub is_public: bool,
    pub validation_attempts: i32,
    pub attempt_history: Option<String>, // JSON [{attempt, error, at}]
    pub version: i32,
    pub lease_token: Option<String>,
    pub leased_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
