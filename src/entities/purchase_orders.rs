use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Purchase order status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PurchaseOrderStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,

    #[sea_orm(string_value = "Approved")]
    Approved,

    #[sea_orm(string_value = "Rejected")]
    Rejected,

    #[sea_orm(string_value = "Receiving")]
    Receiving,

    #[sea_orm(string_value = "Completed")]
    Completed,
}

impl PurchaseOrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Rejected | PurchaseOrderStatus::Completed
        )
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseOrderStatus::Pending => write!(f, "Pending"),
            PurchaseOrderStatus::Approved => write!(f, "Approved"),
            PurchaseOrderStatus::Rejected => write!(f, "Rejected"),
            PurchaseOrderStatus::Receiving => write!(f, "Receiving"),
            PurchaseOrderStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Purchase order header
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub po_number: String,
    pub supplier_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub approval_level: Option<i16>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub expected_delivery_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub total_amount: Decimal,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::suppliers::Entity",
        from = "Column::SupplierId",
        to = "super::suppliers::Column::Id"
    )]
    Supplier,
    #[sea_orm(has_many = "super::purchase_order_items::Entity")]
    Items,
    #[sea_orm(has_many = "super::goods_receipts::Entity")]
    GoodsReceipts,
    #[sea_orm(has_many = "super::invoices::Entity")]
    Invoices,
}

impl Related<super::suppliers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Supplier.def()
    }
}

impl Related<super::purchase_order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::goods_receipts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GoodsReceipts.def()
    }
}

impl Related<super::invoices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PurchaseOrderStatus::Rejected.is_terminal());
        assert!(PurchaseOrderStatus::Completed.is_terminal());
        assert!(!PurchaseOrderStatus::Pending.is_terminal());
        assert!(!PurchaseOrderStatus::Approved.is_terminal());
        assert!(!PurchaseOrderStatus::Receiving.is_terminal());
    }
}
