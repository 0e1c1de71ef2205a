//! Procurest API Library
//!
//! Core functionality for the Procurest procurement and replenishment engine:
//! purchase order lifecycle, goods receipt reconciliation, invoice matching,
//! supplier-driven replenishment, and operational alerting.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod message_queue;
pub mod notifications;
pub mod rate_limiter;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
        }
    }

    pub fn supplier_service(&self) -> services::suppliers::SupplierService {
        services::suppliers::SupplierService::new(self.db.clone(), Some(self.event_sender.clone()))
    }

    pub fn procurement_service(&self) -> services::procurement::ProcurementService {
        let service = services::procurement::ProcurementService::new(
            self.db.clone(),
            self.event_sender.clone(),
        );
        match &self.config.supplier_document_url {
            Some(url) => service.with_document_sender(Arc::new(
                services::collaborators::HttpDocumentSender::new(url.clone()),
            )),
            None => service,
        }
    }

    pub fn goods_receipt_service(&self) -> services::goods_receipt::GoodsReceiptService {
        services::goods_receipt::GoodsReceiptService::new(
            self.db.clone(),
            Some(self.event_sender.clone()),
        )
    }

    pub fn invoice_matching_service(&self) -> services::invoice_matching::InvoiceMatchingService {
        services::invoice_matching::InvoiceMatchingService::new(
            self.db.clone(),
            Some(self.event_sender.clone()),
            self.config.invoice_match_tolerance,
        )
    }

    pub fn alert_dedup_service(&self) -> services::alert_dedup::AlertDedupService {
        services::alert_dedup::AlertDedupService::new(self.db.clone())
    }

    pub fn notification_dispatcher(&self) -> notifications::NotificationDispatcher {
        notifications::NotificationDispatcher::from_config(self.db.clone(), &self.config)
    }

    /// Replenishment needs a supplier mapping; without a configured
    /// mapping file there is nothing to resolve against.
    pub fn replenishment_service(
        &self,
    ) -> Option<Arc<services::replenishment::ReplenishmentService>> {
        let path = self.config.supplier_mapping_file.as_ref()?;
        let mapper = Arc::new(services::supplier_mapping::SupplierMappingService::new(
            Arc::new(services::supplier_mapping::JsonFileMappingSource::new(
                path.clone(),
            )),
            std::time::Duration::from_secs(self.config.supplier_mapping_cache_ttl_secs),
        ));
        Some(Arc::new(
            services::replenishment::ReplenishmentService::new(
                self.db.clone(),
                self.event_sender.clone(),
                mapper,
                services::replenishment::ReplenishmentSettings::from(&self.config),
            ),
        ))
    }

    pub fn alert_scheduler(&self) -> services::scheduler::AlertScheduler {
        let mut core = services::scheduler::SchedulerCore::new(
            self.db.clone(),
            self.alert_dedup_service(),
            Arc::new(self.notification_dispatcher()),
            self.config.procurement_recipients(),
            services::scheduler::SchedulerSettings::from(&self.config),
        );
        if let Some(replenishment) = self.replenishment_service() {
            core = core.with_replenishment(
                replenishment,
                Arc::new(services::collaborators::PurchaseHistoryCatalog::new(
                    self.db.clone(),
                )),
            );
        }
        services::scheduler::AlertScheduler::new(core)
    }
}
