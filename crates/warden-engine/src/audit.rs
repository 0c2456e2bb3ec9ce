//! Two-tier audit ledger.
//!
//! `BestEffort` writes log a warning on failure and processing continues.
//! `Required` writes that fail halt the tenant: the engine stops claiming
//! its intents until an operator resumes it.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{error, info, warn};

use warden_core::error::WardenError;
use warden_core::types::{AuditEntry, AuditLevel, EntityType};
use warden_core::AuditAction;
use warden_storage::{AuditRepository, TenantHaltRepository};

use crate::error::AuditError;

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), WardenError>;
}

impl AuditSink for AuditRepository {
    fn append(&self, entry: &AuditEntry) -> Result<(), WardenError> {
        AuditRepository::append(self, entry)
    }
}

/// How a failed write is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTier {
    BestEffort,
    Required,
}

pub struct AuditLedger {
    sink: Box<dyn AuditSink>,
    halted: Mutex<HashSet<String>>,
    halts: Option<TenantHaltRepository>,
}

impl AuditLedger {
    /// Ledger without durable halts. Halts last for the life of the process.
    pub fn new(sink: Box<dyn AuditSink>) -> Self {
        Self {
            sink,
            halted: Mutex::new(HashSet::new()),
            halts: None,
        }
    }

    /// Ledger whose halts are persisted in `halts`.
    ///
    /// The table is read on every check so that halts raised or lifted by
    /// other workers and by the CLI are seen without a restart.
    pub fn with_halts(sink: Box<dyn AuditSink>, halts: TenantHaltRepository) -> Self {
        Self {
            sink,
            halted: Mutex::new(HashSet::new()),
            halts: Some(halts),
        }
    }

    /// Append an entry under the given tier.
    pub fn record(&self, entry: AuditEntry, tier: AuditTier) -> Result<(), AuditError> {
        mirror(&entry);
        let err = match self.sink.append(&entry) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match tier {
            AuditTier::BestEffort => {
                warn!(
                    tenant = %entry.tenant_id,
                    action = %entry.action,
                    error = %err,
                    "Best-effort audit write failed"
                );
                Ok(())
            }
            AuditTier::Required => {
                error!(
                    tenant = %entry.tenant_id,
                    action = %entry.action,
                    error = %err,
                    "Required audit write failed, halting tenant"
                );
                self.halt(&entry.tenant_id, &format!("{} audit write failed: {}", entry.action, err));
                Err(AuditError::Escalated {
                    tenant: entry.tenant_id,
                    source: err,
                })
            }
        }
    }

    /// Fail if the tenant is halted.
    pub fn ensure_active(&self, tenant_id: &str) -> Result<(), AuditError> {
        if self.is_halted(tenant_id) {
            return Err(AuditError::TenantHalted(tenant_id.to_string()));
        }
        Ok(())
    }

    pub fn is_halted(&self, tenant_id: &str) -> bool {
        self.current().contains(tenant_id)
    }

    /// Tenants excluded from claiming, sorted for stable queries.
    pub fn halted_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.current().into_iter().collect();
        tenants.sort();
        tenants
    }

    /// Durable halts plus any this process could not persist.
    fn current(&self) -> HashSet<String> {
        let mut set = match self.halted.lock() {
            Ok(set) => set.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(repo) = &self.halts {
            match repo.list() {
                Ok(halts) => set.extend(halts.into_iter().map(|h| h.tenant_id)),
                Err(e) => warn!(error = %e, "Failed to read tenant halts"),
            }
        }
        set
    }

    /// Lift a halt after operator review. Returns `false` if the tenant was
    /// not halted.
    pub fn resume_tenant(&self, tenant_id: &str, operator: &str) -> Result<bool, WardenError> {
        let was_halted = {
            let mut set = self
                .halted
                .lock()
                .map_err(|e| WardenError::Storage(format!("Halt set lock poisoned: {}", e)))?;
            set.remove(tenant_id)
        };
        let was_durable = match &self.halts {
            Some(repo) => repo.resume(tenant_id)?,
            None => false,
        };
        if !(was_halted || was_durable) {
            return Ok(false);
        }

        info!(tenant = %tenant_id, operator = %operator, "Tenant resumed");
        let entry = AuditEntry::new(
            tenant_id,
            operator,
            AuditAction::TenantResumed,
            EntityType::Tenant,
            tenant_id,
        )
        .with_message("privileged processing resumed");
        if let Err(e) = self.sink.append(&entry) {
            warn!(tenant = %tenant_id, error = %e, "Failed to audit tenant resume");
        }
        Ok(true)
    }

    fn halt(&self, tenant_id: &str, reason: &str) {
        if self.is_halted(tenant_id) {
            return;
        }
        let persisted = match &self.halts {
            Some(repo) => match repo.halt(tenant_id, reason) {
                Ok(()) => true,
                Err(e) => {
                    error!(tenant = %tenant_id, error = %e, "Failed to persist tenant halt");
                    false
                }
            },
            None => false,
        };
        if !persisted {
            match self.halted.lock() {
                Ok(mut set) => set.insert(tenant_id.to_string()),
                Err(poisoned) => poisoned.into_inner().insert(tenant_id.to_string()),
            };
        }

        let entry = AuditEntry::new(
            tenant_id,
            "system",
            AuditAction::TenantHalted,
            EntityType::Tenant,
            tenant_id,
        )
        .with_message(reason);
        mirror(&entry);
        // The sink just failed; this write is expected to fail too.
        let _ = self.sink.append(&entry);
    }
}

fn mirror(entry: &AuditEntry) {
    match entry.level {
        AuditLevel::Info => info!(
            target: "warden::audit",
            tenant = %entry.tenant_id,
            action = %entry.action,
            entity = %entry.entity_id,
            "{}", entry.message
        ),
        AuditLevel::Warn => warn!(
            target: "warden::audit",
            tenant = %entry.tenant_id,
            action = %entry.action,
            entity = %entry.entity_id,
            "{}", entry.message
        ),
        AuditLevel::Error | AuditLevel::Security => error!(
            target: "warden::audit",
            tenant = %entry.tenant_id,
            action = %entry.action,
            entity = %entry.entity_id,
            level = %entry.level,
            "{}", entry.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use warden_storage::{AuditFilter, Database};

    struct FlakySink {
        fail: Arc<AtomicBool>,
        inner: AuditRepository,
    }

    impl AuditSink for FlakySink {
        fn append(&self, entry: &AuditEntry) -> Result<(), WardenError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WardenError::Storage("disk full".to_string()));
            }
            self.inner.append(entry)
        }
    }

    fn setup() -> (AuditLedger, Arc<AtomicBool>, AuditRepository, TenantHaltRepository) {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = AuditRepository::new(Arc::clone(&db));
        let halts = TenantHaltRepository::new(Arc::clone(&db));
        let fail = Arc::new(AtomicBool::new(false));
        let sink = FlakySink {
            fail: Arc::clone(&fail),
            inner: repo.clone(),
        };
        let ledger = AuditLedger::with_halts(Box::new(sink), halts.clone());
        (ledger, fail, repo, halts)
    }

    fn entry(tenant: &str) -> AuditEntry {
        AuditEntry::new(
            tenant,
            "EXECUTOR",
            AuditAction::PolicyDecision,
            EntityType::Intent,
            "i-1",
        )
    }

    #[test]
    fn test_record_appends() {
        let (ledger, _, repo, _) = setup();
        ledger.record(entry("acme"), AuditTier::Required).unwrap();
        assert_eq!(repo.list(&AuditFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_best_effort_failure_continues() {
        let (ledger, fail, _, _) = setup();
        fail.store(true, Ordering::SeqCst);
        assert!(ledger.record(entry("acme"), AuditTier::BestEffort).is_ok());
        assert!(!ledger.is_halted("acme"));
    }

    #[test]
    fn test_required_failure_halts_tenant() {
        let (ledger, fail, _, halts) = setup();
        fail.store(true, Ordering::SeqCst);

        let err = ledger.record(entry("acme"), AuditTier::Required).unwrap_err();
        assert!(matches!(err, AuditError::Escalated { ref tenant, .. } if tenant == "acme"));
        assert!(ledger.is_halted("acme"));
        assert!(!ledger.is_halted("globex"));
        assert_eq!(ledger.halted_tenants(), vec!["acme".to_string()]);
        assert!(matches!(
            ledger.ensure_active("acme"),
            Err(AuditError::TenantHalted(_))
        ));
        assert_eq!(halts.list().unwrap().len(), 1);
    }

    #[test]
    fn test_resume_tenant() {
        let (ledger, fail, repo, halts) = setup();
        fail.store(true, Ordering::SeqCst);
        let _ = ledger.record(entry("acme"), AuditTier::Required);
        fail.store(false, Ordering::SeqCst);

        assert!(ledger.resume_tenant("acme", "ops@acme").unwrap());
        assert!(ledger.ensure_active("acme").is_ok());
        assert!(halts.list().unwrap().is_empty());
        assert!(!ledger.resume_tenant("acme", "ops@acme").unwrap());

        let resumed = repo
            .list(&AuditFilter {
                action: Some(AuditAction::TenantResumed),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].actor, "ops@acme");
    }

    #[test]
    fn test_halts_read_from_storage() {
        let db = Arc::new(Database::in_memory().unwrap());
        let halts = TenantHaltRepository::new(Arc::clone(&db));
        halts.halt("acme", "earlier failure").unwrap();

        let ledger =
            AuditLedger::with_halts(Box::new(AuditRepository::new(Arc::clone(&db))), halts.clone());
        assert!(ledger.is_halted("acme"));

        // Lifted elsewhere, e.g. by the CLI in another process.
        halts.resume("acme").unwrap();
        assert!(!ledger.is_halted("acme"));
    }
}
