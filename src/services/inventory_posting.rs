use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_audit_entries,
        inventory_levels::{self, Entity as InventoryLevelEntity},
    },
    errors::ServiceError,
};

/// Posts inventory movements inside a caller-owned transaction, so a level
/// change and its audit entry commit or roll back together with the
/// business document that caused them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryPoster: Send + Sync {
    /// Adjusts the on-hand level for `item_name` by `delta`, creating the
    /// row on first sight. Returns the quantity after the change.
    async fn increment_stock(
        &self,
        txn: &DatabaseTransaction,
        item_name: &str,
        delta: i32,
    ) -> Result<i32, ServiceError>;

    async fn append_audit_entry(
        &self,
        txn: &DatabaseTransaction,
        item_name: &str,
        delta: i32,
        quantity_after: i32,
        source_type: &str,
        source_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<(), ServiceError>;
}

/// Database-backed poster used everywhere outside tests.
#[derive(Debug, Clone, Default)]
pub struct DbInventoryPoster;

#[async_trait]
impl InventoryPoster for DbInventoryPoster {
    async fn increment_stock(
        &self,
        txn: &DatabaseTransaction,
        item_name: &str,
        delta: i32,
    ) -> Result<i32, ServiceError> {
        let existing = InventoryLevelEntity::find()
            .filter(inventory_levels::Column::ItemName.eq(item_name))
            .one(txn)
            .await
            .map_err(|e| {
                error!("Failed to load inventory level for '{}': {}", item_name, e);
                ServiceError::db_error(e)
            })?;

        let quantity_after = match existing {
            Some(level) => {
                let new_quantity = level.quantity_on_hand + delta;
                let mut active: inventory_levels::ActiveModel = level.into();
                active.quantity_on_hand = Set(new_quantity);
                active.updated_at = Set(Utc::now());
                active.update(txn).await.map_err(|e| {
                    error!("Failed to update inventory level for '{}': {}", item_name, e);
                    ServiceError::db_error(e)
                })?;
                new_quantity
            }
            None => {
                let level = inventory_levels::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    item_name: Set(item_name.to_string()),
                    quantity_on_hand: Set(delta),
                    updated_at: Set(Utc::now()),
                };
                level.insert(txn).await.map_err(|e| {
                    error!("Failed to create inventory level for '{}': {}", item_name, e);
                    ServiceError::db_error(e)
                })?;
                delta
            }
        };

        info!(
            item_name = %item_name,
            delta = delta,
            quantity_after = quantity_after,
            "Inventory level adjusted"
        );
        Ok(quantity_after)
    }

    async fn append_audit_entry(
        &self,
        txn: &DatabaseTransaction,
        item_name: &str,
        delta: i32,
        quantity_after: i32,
        source_type: &str,
        source_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<(), ServiceError> {
        let entry = inventory_audit_entries::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_name: Set(item_name.to_string()),
            delta: Set(delta),
            quantity_after: Set(quantity_after),
            source_type: Set(source_type.to_string()),
            source_id: Set(source_id),
            note: Set(note),
            created_at: Set(Utc::now()),
        };
        entry.insert(txn).await.map_err(|e| {
            error!("Failed to append inventory audit entry for '{}': {}", item_name, e);
            ServiceError::db_error(e)
        })?;
        Ok(())
    }
}

/// Items whose on-hand level is at or below `threshold`, lowest first.
pub async fn levels_at_or_below(
    db: &DatabaseConnection,
    threshold: i32,
) -> Result<Vec<inventory_levels::Model>, ServiceError> {
    InventoryLevelEntity::find()
        .filter(inventory_levels::Column::QuantityOnHand.lte(threshold))
        .order_by_asc(inventory_levels::Column::QuantityOnHand)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Current on-hand level for one item; zero when the item has never been
/// received.
pub async fn current_level(
    db: &DatabaseConnection,
    item_name: &str,
) -> Result<i32, ServiceError> {
    let level = InventoryLevelEntity::find()
        .filter(inventory_levels::Column::ItemName.eq(item_name))
        .one(db)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(level.map(|l| l.quantity_on_hand).unwrap_or(0))
}
