use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inspection outcome for a received line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum QualityStatus {
    #[sea_orm(string_value = "Accepted")]
    Accepted,

    #[sea_orm(string_value = "Defective")]
    Defective,
}

impl QualityStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityStatus::Accepted)
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityStatus::Accepted => write!(f, "Accepted"),
            QualityStatus::Defective => write!(f, "Defective"),
        }
    }
}

/// Per-line detail of one receipt event. Ordered quantity and unit price are
/// copied from the order line so receipts stay meaningful if the order is
/// later amended.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "goods_receipt_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub goods_receipt_id: Uuid,
    pub purchase_order_item_id: Uuid,
    pub item_name: String,
    pub quantity_ordered: i32,
    pub quantity_received: i32,
    pub unit_price: Decimal,
    pub quality_status: QualityStatus,
    pub quantity_defective: i32,
    /// Set when this event alone exceeds the over-receipt allowance
    pub discrepancy_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::goods_receipts::Entity",
        from = "Column::GoodsReceiptId",
        to = "super::goods_receipts::Column::Id"
    )]
    GoodsReceipt,
    #[sea_orm(
        belongs_to = "super::purchase_order_items::Entity",
        from = "Column::PurchaseOrderItemId",
        to = "super::purchase_order_items::Column::Id"
    )]
    PurchaseOrderItem,
}

impl Related<super::goods_receipts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GoodsReceipt.def()
    }
}

impl Related<super::purchase_order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
