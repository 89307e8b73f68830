//! `SeaORM` Entity for nodes table
//!
//! `status`, `rewards`, `fee` and `uptime` belong to the node monitor;
//! `node_text` and `is_ad` are only written by local promotion edits.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub operator: String,
    pub status: Option<bool>,
    pub rewards: String,
    #[sea_orm(column_type = "Double", nullable)]
    pub fee: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub uptime: Option<f64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub node_text: Option<String>,
    pub is_ad: bool,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
