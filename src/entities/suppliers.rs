use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Supplier master record. Suppliers are never hard-deleted; deactivation
/// flips `active` and keeps history intact.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "suppliers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub contact_email: Option<String>,
    pub tax_id: Option<String>,
    pub active: bool,
    /// 0-5 scale, carried as a decimal so half-points survive
    pub rating: Option<Decimal>,
    pub on_time_delivery_rate: Option<Decimal>,
    pub defect_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_orders::Entity")]
    PurchaseOrders,
    #[sea_orm(has_many = "super::invoices::Entity")]
    Invoices,
    #[sea_orm(has_one = "super::supplier_slas::Entity")]
    SupplierSla,
}

impl Related<super::purchase_orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrders.def()
    }
}

impl Related<super::invoices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoices.def()
    }
}

impl Related<super::supplier_slas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SupplierSla.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
