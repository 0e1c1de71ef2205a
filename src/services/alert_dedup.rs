use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::alert_dedup_records::{self, Entity as DedupEntity},
    errors::ServiceError,
};

/// Suppresses repeat alerts for a condition that is still firing.
///
/// A record for (recipient, subject, threshold) means that alert has
/// already gone out and must not be re-sent until the metric recovers
/// above the threshold, which deletes the record and re-arms the alert.
#[derive(Clone)]
pub struct AlertDedupService {
    db: Arc<DatabaseConnection>,
}

impl AlertDedupService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// True when no dedup record exists for this exact triple.
    #[instrument(skip(self))]
    pub async fn should_send(
        &self,
        recipient: &str,
        subject: &str,
        threshold: Decimal,
    ) -> Result<bool, ServiceError> {
        let existing = DedupEntity::find()
            .filter(alert_dedup_records::Column::Recipient.eq(recipient))
            .filter(alert_dedup_records::Column::Subject.eq(subject))
            .filter(alert_dedup_records::Column::Threshold.eq(threshold))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(existing.is_none())
    }

    #[instrument(skip(self))]
    pub async fn record_sent(
        &self,
        recipient: &str,
        subject: &str,
        threshold: Decimal,
        metric_value: Decimal,
    ) -> Result<(), ServiceError> {
        let record = alert_dedup_records::ActiveModel {
            id: Set(Uuid::new_v4()),
            recipient: Set(recipient.to_string()),
            subject: Set(subject.to_string()),
            threshold: Set(threshold),
            metric_value: Set(metric_value),
            sent_at: Set(Utc::now()),
        };
        record
            .insert(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// Check-and-record in one transaction, for callers where two
    /// concurrent threshold checks could otherwise both decide to send.
    /// Returns true when this caller won the right to send.
    #[instrument(skip(self))]
    pub async fn should_send_and_record(
        &self,
        recipient: &str,
        subject: &str,
        threshold: Decimal,
        metric_value: Decimal,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let existing = DedupEntity::find()
            .filter(alert_dedup_records::Column::Recipient.eq(recipient))
            .filter(alert_dedup_records::Column::Subject.eq(subject))
            .filter(alert_dedup_records::Column::Threshold.eq(threshold))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if existing.is_some() {
            txn.commit().await.map_err(ServiceError::db_error)?;
            return Ok(false);
        }

        let record = alert_dedup_records::ActiveModel {
            id: Set(Uuid::new_v4()),
            recipient: Set(recipient.to_string()),
            subject: Set(subject.to_string()),
            threshold: Set(threshold),
            metric_value: Set(metric_value),
            sent_at: Set(Utc::now()),
        };
        record.insert(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(true)
    }

    /// Re-arms alerts for `subject` once the metric has risen strictly
    /// above the threshold. Returns how many records were cleared.
    #[instrument(skip(self))]
    pub async fn reset_if_recovered(
        &self,
        subject: &str,
        metric_value: Decimal,
        threshold: Decimal,
    ) -> Result<u64, ServiceError> {
        if metric_value <= threshold {
            return Ok(0);
        }

        let result = DedupEntity::delete_many()
            .filter(alert_dedup_records::Column::Subject.eq(subject))
            .filter(alert_dedup_records::Column::Threshold.eq(threshold))
            .exec(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            info!(
                subject = %subject,
                metric_value = %metric_value,
                threshold = %threshold,
                cleared = result.rows_affected,
                "Alert re-armed after recovery"
            );
        }
        Ok(result.rows_affected)
    }
}
