use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AppConfig,
    entities::{
        inventory_levels::{self, Entity as InventoryLevelEntity},
        invoices::{self, Entity as InvoiceEntity, InvoiceMatchStatus},
        purchase_orders::{self, Entity as POEntity, PurchaseOrderStatus},
    },
    errors::ServiceError,
    notifications::{NotificationDispatcher, Priority},
    services::{
        alert_dedup::AlertDedupService, collaborators::LowStockCatalog, inventory_posting,
        replenishment::ReplenishmentService,
    },
};

const PENDING_ORDERS_SUBJECT: &str = "pending_purchase_orders";
const SCHEDULER_ACTOR: &str = "scheduler";

fn overdue_subject(po_number: &str) -> String {
    format!("po_overdue:{}", po_number)
}

fn low_stock_subject(item_name: &str) -> String {
    format!("low_stock:{}", item_name)
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pending_summary_interval: Duration,
    pub overdue_check_interval: Duration,
    pub low_stock_interval: Duration,
    pub daily_digest_interval: Duration,
    pub shutdown_grace: Duration,
    pub low_stock_threshold: i32,
}

impl From<&AppConfig> for SchedulerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            pending_summary_interval: Duration::from_secs(
                config.scheduler_pending_summary_interval_secs,
            ),
            overdue_check_interval: Duration::from_secs(
                config.scheduler_overdue_check_interval_secs,
            ),
            low_stock_interval: Duration::from_secs(config.scheduler_low_stock_interval_secs),
            daily_digest_interval: Duration::from_secs(
                config.scheduler_daily_digest_interval_secs,
            ),
            shutdown_grace: Duration::from_secs(config.scheduler_shutdown_grace_secs),
            low_stock_threshold: config.low_stock_alert_threshold,
        }
    }
}

/// Clears the running flag when the check finishes, panics included.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The periodic checks and the state they share. Each check is idempotent
/// and guarded by a running flag, so a tick that arrives while the
/// previous run is still going is skipped rather than stacked.
pub struct SchedulerCore {
    db: Arc<DatabaseConnection>,
    dedup: AlertDedupService,
    dispatcher: Arc<NotificationDispatcher>,
    replenishment: Option<Arc<ReplenishmentService>>,
    catalog: Option<Arc<dyn LowStockCatalog>>,
    recipients: Vec<String>,
    settings: SchedulerSettings,
    pending_check_running: AtomicBool,
    overdue_check_running: AtomicBool,
    low_stock_check_running: AtomicBool,
    digest_running: AtomicBool,
}

impl SchedulerCore {
    pub fn new(
        db: Arc<DatabaseConnection>,
        dedup: AlertDedupService,
        dispatcher: Arc<NotificationDispatcher>,
        recipients: Vec<String>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            db,
            dedup,
            dispatcher,
            replenishment: None,
            catalog: None,
            recipients,
            settings,
            pending_check_running: AtomicBool::new(false),
            overdue_check_running: AtomicBool::new(false),
            low_stock_check_running: AtomicBool::new(false),
            digest_running: AtomicBool::new(false),
        }
    }

    /// Enables automatic reorder creation from the low-stock check. Both
    /// halves are needed: the catalog to enrich item names, the service to
    /// place the orders.
    pub fn with_replenishment(
        mut self,
        replenishment: Arc<ReplenishmentService>,
        catalog: Arc<dyn LowStockCatalog>,
    ) -> Self {
        self.replenishment = Some(replenishment);
        self.catalog = Some(catalog);
        self
    }

    /// Recipients that have not been alerted for this (subject, threshold)
    /// since the last recovery, recording the send for each in the same
    /// step.
    async fn eligible_recipients(
        &self,
        subject: &str,
        threshold: Decimal,
        metric_value: Decimal,
    ) -> Result<Vec<String>, ServiceError> {
        let mut eligible = Vec::new();
        for recipient in &self.recipients {
            if self
                .dedup
                .should_send_and_record(recipient, subject, threshold, metric_value)
                .await?
            {
                eligible.push(recipient.clone());
            }
        }
        Ok(eligible)
    }

    /// Summarizes purchase orders still waiting for approval. Once the
    /// queue drains, the alert is re-armed for the next backlog.
    #[instrument(skip(self))]
    pub async fn check_pending_orders(&self) -> Result<(), ServiceError> {
        let _guard = match RunGuard::try_acquire(&self.pending_check_running) {
            Some(guard) => guard,
            None => {
                warn!("Pending-order check still running; tick skipped");
                return Ok(());
            }
        };

        let pending = POEntity::find()
            .filter(purchase_orders::Column::Status.eq(PurchaseOrderStatus::Pending))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;

        if pending.is_empty() {
            self.dedup
                .reset_if_recovered(PENDING_ORDERS_SUBJECT, Decimal::ONE, Decimal::ZERO)
                .await?;
            return Ok(());
        }

        let count = pending.len();
        let total: Decimal = pending.iter().map(|po| po.total_amount).sum();
        let eligible = self
            .eligible_recipients(
                PENDING_ORDERS_SUBJECT,
                Decimal::ZERO,
                Decimal::from(count as u64),
            )
            .await?;
        if eligible.is_empty() {
            return Ok(());
        }

        let body = format!(
            "{} purchase order(s) awaiting approval, {} total value.",
            count, total
        );
        self.dispatcher
            .dispatch(
                &eligible,
                "Purchase orders awaiting approval",
                &body,
                Priority::Normal,
            )
            .await;
        Ok(())
    }

    /// Alerts once per overdue purchase order. Overdue orders only leave
    /// the set by reaching a terminal state, so there is no recovery pass.
    #[instrument(skip(self))]
    pub async fn check_overdue_orders(&self) -> Result<(), ServiceError> {
        let _guard = match RunGuard::try_acquire(&self.overdue_check_running) {
            Some(guard) => guard,
            None => {
                warn!("Overdue-order check still running; tick skipped");
                return Ok(());
            }
        };

        let now = Utc::now();
        let overdue = POEntity::find()
            .filter(purchase_orders::Column::ExpectedDeliveryDate.lt(now))
            .filter(
                purchase_orders::Column::Status
                    .is_not_in([PurchaseOrderStatus::Rejected, PurchaseOrderStatus::Completed]),
            )
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;

        for po in overdue {
            let days_overdue = (now - po.expected_delivery_date).num_days().max(0);
            let subject = overdue_subject(&po.po_number);
            let eligible = self
                .eligible_recipients(&subject, Decimal::ZERO, Decimal::from(days_overdue))
                .await?;
            if eligible.is_empty() {
                continue;
            }

            let title = format!("Overdue purchase order {}", po.po_number);
            let body = format!(
                "Expected delivery {}, now {} day(s) overdue (status {}).",
                po.expected_delivery_date.format("%Y-%m-%d"),
                days_overdue,
                po.status
            );
            self.dispatcher
                .dispatch(&eligible, &title, &body, Priority::High)
                .await;
        }
        Ok(())
    }

    /// Scans on-hand levels, alerts on items at or below the threshold,
    /// re-arms items that recovered, and hands the low set to the
    /// replenishment service when one is wired in.
    #[instrument(skip(self))]
    pub async fn check_low_stock(&self) -> Result<(), ServiceError> {
        let _guard = match RunGuard::try_acquire(&self.low_stock_check_running) {
            Some(guard) => guard,
            None => {
                warn!("Low-stock check still running; tick skipped");
                return Ok(());
            }
        };

        let threshold = self.settings.low_stock_threshold;
        let threshold_value = Decimal::from(threshold);
        let low = inventory_posting::levels_at_or_below(self.db.as_ref(), threshold).await?;

        for level in &low {
            let subject = low_stock_subject(&level.item_name);
            let eligible = self
                .eligible_recipients(
                    &subject,
                    threshold_value,
                    Decimal::from(level.quantity_on_hand),
                )
                .await?;
            if eligible.is_empty() {
                continue;
            }

            let body = format!(
                "{}: {} on hand, at or below the reorder threshold of {}.",
                level.item_name, level.quantity_on_hand, threshold
            );
            self.dispatcher
                .dispatch(&eligible, "Low stock alert", &body, Priority::High)
                .await;
        }

        let recovered = InventoryLevelEntity::find()
            .filter(inventory_levels::Column::QuantityOnHand.gt(threshold))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        for level in recovered {
            self.dedup
                .reset_if_recovered(
                    &low_stock_subject(&level.item_name),
                    Decimal::from(level.quantity_on_hand),
                    threshold_value,
                )
                .await?;
        }

        if !low.is_empty() {
            self.replenish_low_stock(&low).await;
        }
        Ok(())
    }

    /// Replenishment failures never fail the low-stock check; alerts have
    /// already gone out at this point.
    async fn replenish_low_stock(&self, low: &[inventory_levels::Model]) {
        let (Some(catalog), Some(replenishment)) = (&self.catalog, &self.replenishment) else {
            return;
        };

        let names: Vec<String> = low.iter().map(|l| l.item_name.clone()).collect();
        let items = match catalog.describe(&names).await {
            Ok(items) => items,
            Err(e) => {
                error!("Catalog lookup for low-stock items failed: {}", e);
                return;
            }
        };
        if items.is_empty() {
            return;
        }

        match replenishment
            .create_orders_from_low_stock(items, SCHEDULER_ACTOR)
            .await
        {
            Ok(outcome) => {
                if !outcome.orders_by_supplier.is_empty() {
                    info!(
                        orders = outcome.orders_by_supplier.len(),
                        skipped = outcome.skipped_items.len(),
                        "Replenishment orders created from low-stock scan"
                    );
                }
            }
            Err(e) => error!("Replenishment run failed: {}", e),
        }
    }

    /// Once-a-day operational summary. Always sent, never deduplicated.
    #[instrument(skip(self))]
    pub async fn run_daily_digest(&self) -> Result<(), ServiceError> {
        let _guard = match RunGuard::try_acquire(&self.digest_running) {
            Some(guard) => guard,
            None => {
                warn!("Daily digest still running; tick skipped");
                return Ok(());
            }
        };

        if self.recipients.is_empty() {
            debug!("No digest recipients configured; skipping");
            return Ok(());
        }

        let pending_orders = POEntity::find()
            .filter(purchase_orders::Column::Status.eq(PurchaseOrderStatus::Pending))
            .count(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        let unresolved_invoices = InvoiceEntity::find()
            .filter(invoices::Column::MatchStatus.eq(InvoiceMatchStatus::Mismatched))
            .filter(invoices::Column::Matched.eq(false))
            .count(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        let low_stock_items =
            inventory_posting::levels_at_or_below(self.db.as_ref(), self.settings.low_stock_threshold)
                .await?
                .len();

        let body = format!(
            "Pending purchase orders: {}\nUnresolved invoice mismatches: {}\nItems at or below reorder threshold: {}",
            pending_orders, unresolved_invoices, low_stock_items
        );
        self.dispatcher
            .dispatch(
                &self.recipients,
                "Daily procurement digest",
                &body,
                Priority::Normal,
            )
            .await;
        Ok(())
    }
}

/// Owns the worker tasks that drive the periodic checks. `start` spawns
/// one loop per check; `shutdown` flips the watch channel, waits for
/// in-flight checks within the configured grace period and abandons
/// whatever is still running after that.
pub struct AlertScheduler {
    core: Arc<SchedulerCore>,
    shutdown: watch::Sender<bool>,
    handles: tokio::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl AlertScheduler {
    pub fn new(core: SchedulerCore) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            core: Arc::new(core),
            shutdown,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn core(&self) -> Arc<SchedulerCore> {
        self.core.clone()
    }

    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("Alert scheduler already started");
            return;
        }

        let settings = &self.core.settings;
        handles.push((
            "pending_summary",
            self.spawn_worker("pending_summary", settings.pending_summary_interval, |core| async move {
                core.check_pending_orders().await
            }),
        ));
        handles.push((
            "overdue_orders",
            self.spawn_worker("overdue_orders", settings.overdue_check_interval, |core| async move {
                core.check_overdue_orders().await
            }),
        ));
        handles.push((
            "low_stock",
            self.spawn_worker("low_stock", settings.low_stock_interval, |core| async move {
                core.check_low_stock().await
            }),
        ));
        handles.push((
            "daily_digest",
            self.spawn_worker("daily_digest", settings.daily_digest_interval, |core| async move {
                core.run_daily_digest().await
            }),
        ));
        info!(workers = handles.len(), "Alert scheduler started");
    }

    fn spawn_worker<F, Fut>(&self, name: &'static str, period: Duration, check: F) -> JoinHandle<()>
    where
        F: Fn(Arc<SchedulerCore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send,
    {
        let core = self.core.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so checks
            // start one full period after boot.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = check(core.clone()).await {
                            // One failed run must not stop the loop.
                            error!(check = name, "Scheduled check failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(check = name, "Scheduler worker stopping");
                        break;
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) {
        if self.shutdown.send(true).is_err() {
            debug!("No scheduler workers listening for shutdown");
        }

        let grace = self.core.settings.shutdown_grace;
        let mut handles = self.handles.lock().await;
        for (name, handle) in handles.drain(..) {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => debug!(check = name, "Scheduler worker stopped"),
                Ok(Err(e)) => error!(check = name, "Scheduler worker panicked: {}", e),
                Err(_) => {
                    warn!(
                        check = name,
                        "Scheduler worker did not stop within {:?}; abandoning", grace
                    );
                }
            }
        }
        info!("Alert scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_carry_their_identifier() {
        assert_eq!(overdue_subject("PO-42"), "po_overdue:PO-42");
        assert_eq!(low_stock_subject("Flour (25kg)"), "low_stock:Flour (25kg)");
    }

    #[test]
    fn run_guard_blocks_second_acquire_until_dropped() {
        let flag = AtomicBool::new(false);

        let first = RunGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(RunGuard::try_acquire(&flag).is_none());

        drop(first);
        assert!(RunGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn settings_translate_seconds_into_durations() {
        let settings = SchedulerSettings {
            pending_summary_interval: Duration::from_secs(300),
            overdue_check_interval: Duration::from_secs(300),
            low_stock_interval: Duration::from_secs(60),
            daily_digest_interval: Duration::from_secs(86_400),
            shutdown_grace: Duration::from_secs(30),
            low_stock_threshold: 10,
        };
        assert_eq!(settings.low_stock_interval, Duration::from_secs(60));
        assert_eq!(settings.low_stock_threshold, 10);
    }
}
