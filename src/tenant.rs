use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::collab::Collaborators;
use crate::compactor;
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Manages per-business engines. Each business gets its own Engine + WAL +
/// compactor, and appointment ids are routed back to their business.
pub struct TenantManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    /// Appointment id → owning business.
    appointments: DashMap<Ulid, Ulid>,
    config: Arc<EngineConfig>,
    collab: Collaborators,
}

fn wal_error(e: io::Error) -> EngineError {
    EngineError::WalError(e.to_string())
}

impl TenantManager {
    pub fn new(config: EngineConfig, collab: Collaborators) -> Self {
        Self {
            engines: DashMap::new(),
            appointments: DashMap::new(),
            config: Arc::new(config),
            collab,
        }
    }

    /// Get or lazily create the engine for `business_id`, replaying its WAL.
    pub fn get_or_create(&self, business_id: Ulid) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(&business_id) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= self.config.max_businesses {
            return Err(io::Error::other("too many businesses"));
        }
        std::fs::create_dir_all(&self.config.data_dir)?;

        let engine = match self.engines.entry(business_id) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let wal_path = self.config.data_dir.join(format!("{business_id}.wal"));
                let engine = Arc::new(Engine::new(
                    business_id,
                    wal_path,
                    self.collab.clone(),
                    self.config.clone(),
                )?);
                v.insert(engine.clone());
                engine
            }
        };
        for id in engine.appointment_ids() {
            self.appointments.insert(id, business_id);
        }

        let compactor_engine = engine.clone();
        let threshold = self.config.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("business {business_id} loaded");
        Ok(engine)
    }

    /// Load every business that already has a WAL in the data directory.
    pub fn open_existing(&self) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut loaded = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "wal") {
                continue;
            }
            let Some(business_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Ulid::from_string(s).ok())
            else {
                tracing::warn!("skipping unrecognized WAL file {}", path.display());
                continue;
            };
            self.get_or_create(business_id)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn business_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.engines.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Engine of an already-loaded business.
    pub fn engine(&self, business_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        self.engines
            .get(&business_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(business_id))
    }

    /// Engine owning appointment `id`.
    pub fn engine_for_appointment(&self, id: Ulid) -> Result<Arc<Engine>, EngineError> {
        let business_id = *self.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        self.engine(business_id)
    }

    // ── Catalog ──────────────────────────────────────────────

    /// Create or reconfigure a business, loading its engine on first use.
    pub async fn configure_business(&self, business: Business) -> Result<Arc<Engine>, EngineError> {
        let engine = self.get_or_create(business.id).map_err(wal_error)?;
        engine.configure_business(business).await?;
        Ok(engine)
    }

    /// Import a catalog. A catalog carrying a business may introduce it;
    /// otherwise `business_id` must already be loaded.
    pub async fn load_catalog(&self, business_id: Ulid, catalog: Catalog) -> Result<(), EngineError> {
        let engine = match &catalog.business {
            Some(business) if business.id == business_id => self.get_or_create(business_id).map_err(wal_error)?,
            Some(business) => {
                return Err(EngineError::invalid(format!(
                    "catalog business {} does not match {business_id}",
                    business.id
                )));
            }
            None => self.engine(business_id)?,
        };
        engine.load_catalog(catalog).await
    }

    // ── Public contract ──────────────────────────────────────

    pub async fn check_availability(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_ids: &[Ulid],
        staff_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        self.engine(business_id)?
            .check_availability(date, service_ids, staff_id)
            .await
    }

    pub async fn calculate_price(
        &self,
        business_id: Ulid,
        service_ids: &[Ulid],
        discount_code: Option<&str>,
    ) -> Result<PriceQuote, EngineError> {
        self.engine(business_id)?
            .calculate_price(service_ids, discount_code)
            .await
    }

    pub async fn validate_discount(
        &self,
        code: &str,
        business_id: Ulid,
        subtotal: Money,
        service_ids: &[Ulid],
    ) -> Result<Promotion, EngineError> {
        self.engine(business_id)?
            .validate_discount(code, subtotal, service_ids)
            .await
    }

    pub async fn create_booking(&self, request: BookingRequest) -> Result<Appointment, EngineError> {
        let business_id = request.business_id;
        let appointment = self.engine(business_id)?.create_booking(request).await?;
        self.appointments.insert(appointment.id, business_id);
        Ok(appointment)
    }

    pub async fn cancel_booking(
        &self,
        appointment_id: Ulid,
        cancelled_by: Ulid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, EngineError> {
        self.engine_for_appointment(appointment_id)?
            .cancel_booking(appointment_id, cancelled_by, reason, None)
            .await
    }

    pub async fn reschedule_booking(
        &self,
        appointment_id: Ulid,
        new_date: NaiveDate,
        new_start_time: &str,
        changed_by: Ulid,
    ) -> Result<Appointment, EngineError> {
        self.engine_for_appointment(appointment_id)?
            .reschedule_booking(appointment_id, new_date, new_start_time, changed_by, None)
            .await
    }

    pub fn get_appointment(&self, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.engine_for_appointment(appointment_id)?
            .get_appointment(&appointment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf, max_businesses: usize) -> TenantManager {
        let config = EngineConfig {
            data_dir: dir,
            max_businesses,
            ..EngineConfig::default()
        };
        TenantManager::new(config, Collaborators::default())
    }

    #[tokio::test]
    async fn lazy_creation_writes_wal_per_business() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone(), 10);
        assert!(fs::read_dir(&dir).unwrap().next().is_none());

        let id = Ulid::new();
        tm.get_or_create(id).unwrap();
        assert!(dir.join(format!("{id}.wal")).exists());
        assert_eq!(tm.business_ids(), vec![id]);
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let dir = test_data_dir("same_engine");
        let tm = manager(dir, 10);
        let id = Ulid::new();
        let a = tm.get_or_create(id).unwrap();
        let b = tm.get_or_create(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn business_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir, 2);
        tm.get_or_create(Ulid::new()).unwrap();
        tm.get_or_create(Ulid::new()).unwrap();
        let err = tm.get_or_create(Ulid::new()).err().unwrap();
        assert!(err.to_string().contains("too many businesses"));
    }

    #[tokio::test]
    async fn unknown_business_and_appointment_are_not_found() {
        let dir = test_data_dir("not_found");
        let tm = manager(dir, 10);
        let err = tm.engine(Ulid::new()).err().unwrap();
        assert!(matches!(err, EngineError::NotFound(_)));
        let err = tm.get_appointment(Ulid::new()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_existing_skips_foreign_files() {
        let dir = test_data_dir("open_existing");
        let (a, b) = (Ulid::new(), Ulid::new());
        {
            let tm = manager(dir.clone(), 10);
            tm.get_or_create(a).unwrap();
            tm.get_or_create(b).unwrap();
        }
        fs::write(dir.join("notes.txt"), "hello").unwrap();
        fs::write(dir.join("not-a-ulid.wal"), "").unwrap();

        let tm = manager(dir, 10);
        assert_eq!(tm.open_existing().unwrap(), 2);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(tm.business_ids(), expected);
    }

    #[tokio::test]
    async fn missing_data_dir_opens_nothing() {
        let dir = test_data_dir("missing").join("absent");
        let tm = manager(dir, 10);
        assert_eq!(tm.open_existing().unwrap(), 0);
    }
}
