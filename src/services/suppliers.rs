use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        supplier_slas::{self, Entity as SlaEntity},
        suppliers::{self, Entity as SupplierEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

fn max_rating() -> Decimal {
    Decimal::from(5)
}

/// Rolling average over one more observation.
fn rolling_average(old_avg: Decimal, old_count: i32, new_value: Decimal) -> Decimal {
    let count = Decimal::from(old_count);
    (old_avg * count + new_value) / (count + Decimal::ONE)
}

fn on_time_rate(on_time_deliveries: i32, total_deliveries: i32) -> Decimal {
    if total_deliveries == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(on_time_deliveries) / Decimal::from(total_deliveries)
}

#[derive(Debug, Clone, Validate)]
pub struct CreateSupplierRequest {
    #[validate(length(min = 1, message = "Supplier name is required"))]
    pub name: String,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub tax_id: Option<String>,
}

/// Service for managing the supplier directory. Suppliers are never
/// hard-deleted; deactivation hides them from ordering.
#[derive(Clone)]
pub struct SupplierService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl SupplierService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_supplier(
        &self,
        request: CreateSupplierRequest,
    ) -> Result<suppliers::Model, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let supplier = suppliers::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.clone()),
            contact_email: Set(request.contact_email.clone()),
            tax_id: Set(request.tax_id.clone()),
            active: Set(true),
            rating: Set(None),
            on_time_delivery_rate: Set(None),
            defect_rate: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = supplier.insert(self.db.as_ref()).await.map_err(|e| {
            error!("Failed to create supplier '{}': {}", request.name, e);
            ServiceError::db_error(e)
        })?;

        info!(supplier_id = %created.id, name = %created.name, "Supplier created");
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::SupplierCreated(created.id)).await;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_supplier(
        &self,
        supplier_id: &Uuid,
    ) -> Result<Option<suppliers::Model>, ServiceError> {
        SupplierEntity::find_by_id(*supplier_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self))]
    pub async fn get_supplier_by_name(
        &self,
        name: &str,
    ) -> Result<Option<suppliers::Model>, ServiceError> {
        SupplierEntity::find()
            .filter(suppliers::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self))]
    pub async fn list_suppliers(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<suppliers::Model>, ServiceError> {
        SupplierEntity::find()
            .order_by_asc(suppliers::Column::Name)
            .limit(Some(limit))
            .offset(offset)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Soft-deactivates a supplier so no new orders can target it.
    #[instrument(skip(self))]
    pub async fn deactivate_supplier(
        &self,
        supplier_id: Uuid,
    ) -> Result<suppliers::Model, ServiceError> {
        let supplier = self
            .get_supplier(&supplier_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Supplier {} not found", supplier_id))
            })?;

        let mut active: suppliers::ActiveModel = supplier.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(self.db.as_ref()).await.map_err(|e| {
            error!("Failed to deactivate supplier {}: {}", supplier_id, e);
            ServiceError::db_error(e)
        })?;

        info!(supplier_id = %supplier_id, "Supplier deactivated");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::SupplierDeactivated(supplier_id))
                .await;
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn update_rating(
        &self,
        supplier_id: Uuid,
        rating: Decimal,
    ) -> Result<suppliers::Model, ServiceError> {
        if rating < Decimal::ZERO || rating > max_rating() {
            return Err(ServiceError::ValidationError(format!(
                "Rating {} must be between 0 and {}",
                rating,
                max_rating()
            )));
        }

        let supplier = self
            .get_supplier(&supplier_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Supplier {} not found", supplier_id))
            })?;

        let mut active: suppliers::ActiveModel = supplier.into();
        active.rating = Set(Some(rating));
        active.updated_at = Set(Utc::now());
        active.update(self.db.as_ref()).await.map_err(|e| {
            error!("Failed to update rating for supplier {}: {}", supplier_id, e);
            ServiceError::db_error(e)
        })
    }

    /// Records one delivery outcome into the supplier's rolling SLA
    /// figures and pushes the refreshed on-time rate onto the supplier
    /// row, all in one transaction.
    #[instrument(skip(self))]
    pub async fn record_delivery_evaluation(
        &self,
        supplier_id: Uuid,
        on_time: bool,
        delay_days: i32,
    ) -> Result<supplier_slas::Model, ServiceError> {
        if delay_days < 0 {
            return Err(ServiceError::ValidationError(
                "Delay days cannot be negative".to_string(),
            ));
        }

        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let supplier = SupplierEntity::find_by_id(supplier_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Supplier {} not found", supplier_id))
            })?;

        let existing = SlaEntity::find_by_id(supplier_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let now = Utc::now();
        let sla = match existing {
            Some(sla) => {
                let total = sla.total_deliveries + 1;
                let on_time_total = sla.on_time_deliveries + i32::from(on_time);
                let avg = rolling_average(
                    sla.average_delay_days,
                    sla.total_deliveries,
                    Decimal::from(delay_days),
                );
                let mut active: supplier_slas::ActiveModel = sla.into();
                active.total_deliveries = Set(total);
                active.on_time_deliveries = Set(on_time_total);
                active.average_delay_days = Set(avg);
                active.last_evaluated_at = Set(now);
                active.update(&txn).await.map_err(ServiceError::db_error)?
            }
            None => {
                let sla = supplier_slas::ActiveModel {
                    supplier_id: Set(supplier_id),
                    total_deliveries: Set(1),
                    on_time_deliveries: Set(i32::from(on_time)),
                    average_delay_days: Set(Decimal::from(delay_days)),
                    last_evaluated_at: Set(now),
                };
                sla.insert(&txn).await.map_err(ServiceError::db_error)?
            }
        };

        let rate = on_time_rate(sla.on_time_deliveries, sla.total_deliveries);
        let mut active_supplier: suppliers::ActiveModel = supplier.into();
        active_supplier.on_time_delivery_rate = Set(Some(rate));
        active_supplier.updated_at = Set(now);
        active_supplier
            .update(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            supplier_id = %supplier_id,
            on_time = on_time,
            delay_days = delay_days,
            on_time_rate = %rate,
            "Delivery evaluation recorded"
        );
        Ok(sla)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rolling_average_starts_from_first_observation() {
        let avg = rolling_average(Decimal::ZERO, 0, dec!(3));
        assert_eq!(avg, dec!(3));
    }

    #[test]
    fn rolling_average_weights_history() {
        // Two deliveries averaging 2 days, then a 5-day delay.
        let avg = rolling_average(dec!(2), 2, dec!(5));
        assert_eq!(avg, dec!(3));
    }

    #[test]
    fn on_time_rate_handles_zero_deliveries() {
        assert_eq!(on_time_rate(0, 0), Decimal::ZERO);
    }

    #[test]
    fn on_time_rate_is_fractional() {
        assert_eq!(on_time_rate(3, 4), dec!(0.75));
    }

    #[test]
    fn create_request_rejects_empty_name() {
        let request = CreateSupplierRequest {
            name: String::new(),
            contact_email: None,
            tax_id: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn create_request_rejects_bad_email() {
        let request = CreateSupplierRequest {
            name: "Acme Foods".to_string(),
            contact_email: Some("not-an-email".to_string()),
            tax_id: None,
        };
        assert!(request.validate().is_err());
    }
}
