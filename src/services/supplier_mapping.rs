use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Read-only source of the product/category name to supplier-id mapping.
/// Implementations load the whole table; the service handles caching.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupplierMappingSource: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, Uuid>, ServiceError>;
}

/// Reads the mapping from a JSON file of name to supplier id, e.g.
/// `{"flour (25kg)": "3f2a...", "baking": "91bc..."}`.
pub struct JsonFileMappingSource {
    path: PathBuf,
}

impl JsonFileMappingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SupplierMappingSource for JsonFileMappingSource {
    async fn load(&self) -> Result<HashMap<String, Uuid>, ServiceError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ServiceError::InternalError(format!(
                "Supplier mapping file {} unreadable: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ServiceError::ValidationError(format!(
                "Supplier mapping file {} malformed: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Resolves which supplier restocks a product, by product name first and
/// category name as a fallback. Lookups are case-insensitive.
///
/// The mapping is cached per instance and refreshed on read once the TTL
/// has passed. A failed refresh keeps serving the previous snapshot.
pub struct SupplierMappingService {
    source: Arc<dyn SupplierMappingSource>,
    cache: DashMap<String, Uuid>,
    last_refresh: Mutex<Option<Instant>>,
    ttl: Duration,
}

impl SupplierMappingService {
    pub fn new(source: Arc<dyn SupplierMappingSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            last_refresh: Mutex::new(None),
            ttl,
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, product_name: &str, category_name: &str) -> Option<Uuid> {
        self.ensure_fresh().await;

        let product_key = product_name.to_lowercase();
        if let Some(id) = self.cache.get(&product_key) {
            return Some(*id);
        }
        let category_key = category_name.to_lowercase();
        if let Some(id) = self.cache.get(&category_key) {
            debug!(
                product = %product_name,
                category = %category_name,
                "Supplier resolved via category fallback"
            );
            return Some(*id);
        }
        None
    }

    async fn ensure_fresh(&self) {
        let stale = {
            let last = self.last_refresh.lock().unwrap();
            match *last {
                Some(at) => at.elapsed() >= self.ttl,
                None => true,
            }
        };
        if !stale {
            return;
        }

        match self.source.load().await {
            Ok(mapping) => {
                self.cache.clear();
                for (key, id) in mapping {
                    self.cache.insert(key.to_lowercase(), id);
                }
                *self.last_refresh.lock().unwrap() = Some(Instant::now());
            }
            Err(e) => {
                // Keep the previous snapshot; a stale mapping beats none.
                warn!("Supplier mapping refresh failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(entries: &[(&str, Uuid)]) -> HashMap<String, Uuid> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[tokio::test]
    async fn resolves_by_product_name_before_category() {
        let product_supplier = Uuid::new_v4();
        let category_supplier = Uuid::new_v4();
        let mut source = MockSupplierMappingSource::new();
        let snapshot = mapping(&[
            ("espresso beans", product_supplier),
            ("coffee", category_supplier),
        ]);
        source
            .expect_load()
            .times(1)
            .returning(move || Ok(snapshot.clone()));

        let service = SupplierMappingService::new(Arc::new(source), Duration::from_secs(60));
        assert_eq!(
            service.resolve("Espresso Beans", "Coffee").await,
            Some(product_supplier)
        );
    }

    #[tokio::test]
    async fn falls_back_to_category_when_product_unknown() {
        let category_supplier = Uuid::new_v4();
        let mut source = MockSupplierMappingSource::new();
        let snapshot = mapping(&[("coffee", category_supplier)]);
        source
            .expect_load()
            .times(1)
            .returning(move || Ok(snapshot.clone()));

        let service = SupplierMappingService::new(Arc::new(source), Duration::from_secs(60));
        assert_eq!(
            service.resolve("House Blend", "Coffee").await,
            Some(category_supplier)
        );
    }

    #[tokio::test]
    async fn unknown_product_and_category_resolve_to_none() {
        let mut source = MockSupplierMappingSource::new();
        source
            .expect_load()
            .returning(|| Ok(HashMap::new()));

        let service = SupplierMappingService::new(Arc::new(source), Duration::from_secs(60));
        assert_eq!(service.resolve("Widget", "Hardware").await, None);
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let supplier = Uuid::new_v4();
        let mut source = MockSupplierMappingSource::new();
        let snapshot = mapping(&[("flour", supplier)]);
        source
            .expect_load()
            .times(1)
            .returning(move || Ok(snapshot.clone()));

        let service = SupplierMappingService::new(Arc::new(source), Duration::from_secs(60));
        for _ in 0..5 {
            assert_eq!(service.resolve("Flour", "Baking").await, Some(supplier));
        }
    }

    #[tokio::test]
    async fn expired_ttl_triggers_refresh() {
        let supplier = Uuid::new_v4();
        let mut source = MockSupplierMappingSource::new();
        let snapshot = mapping(&[("flour", supplier)]);
        source
            .expect_load()
            .times(2)
            .returning(move || Ok(snapshot.clone()));

        let service = SupplierMappingService::new(Arc::new(source), Duration::ZERO);
        service.resolve("Flour", "Baking").await;
        service.resolve("Flour", "Baking").await;
    }

    #[tokio::test]
    async fn json_file_source_loads_name_to_id_pairs() {
        let supplier = Uuid::new_v4();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suppliers.json");
        std::fs::write(
            &path,
            format!(r#"{{"flour (25kg)": "{}"}}"#, supplier),
        )
        .unwrap();

        let loaded = JsonFileMappingSource::new(&path).load().await.unwrap();
        assert_eq!(loaded.get("flour (25kg)"), Some(&supplier));
    }

    #[tokio::test]
    async fn json_file_source_reports_missing_file() {
        let source = JsonFileMappingSource::new("/nonexistent/suppliers.json");
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, ServiceError::InternalError(_)));
    }

    #[tokio::test]
    async fn json_file_source_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suppliers.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonFileMappingSource::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let supplier = Uuid::new_v4();
        let mut source = MockSupplierMappingSource::new();
        let snapshot = mapping(&[("flour", supplier)]);
        let mut calls = 0;
        source.expect_load().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(snapshot.clone())
            } else {
                Err(ServiceError::InternalError("source offline".to_string()))
            }
        });

        let service = SupplierMappingService::new(Arc::new(source), Duration::ZERO);
        assert_eq!(service.resolve("Flour", "Baking").await, Some(supplier));
        assert_eq!(service.resolve("Flour", "Baking").await, Some(supplier));
    }
}
