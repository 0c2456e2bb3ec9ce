//! Durable record of tenants whose privileged processing is halted.

use std::sync::Arc;

use rusqlite::params;
use serde::Serialize;

use warden_core::error::WardenError;
use warden_core::types::Timestamp;

use crate::db::Database;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantHalt {
    pub tenant_id: String,
    pub reason: String,
    pub halted_at: Timestamp,
}

#[derive(Clone)]
pub struct TenantHaltRepository {
    db: Arc<Database>,
}

impl TenantHaltRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a halt. An existing halt for the tenant is kept as is.
    pub fn halt(&self, tenant_id: &str, reason: &str) -> Result<(), WardenError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tenant_halts (tenant_id, reason, halted_at)
                 VALUES (?1, ?2, ?3)",
                params![tenant_id, reason, Timestamp::now().0],
            )
            .map_err(|e| WardenError::Storage(format!("Failed to halt tenant: {}", e)))?;
            Ok(())
        })
    }

    /// Remove a halt. Returns `false` if the tenant was not halted.
    pub fn resume(&self, tenant_id: &str) -> Result<bool, WardenError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM tenant_halts WHERE tenant_id = ?1",
                    params![tenant_id],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to resume tenant: {}", e)))?;
            Ok(changed == 1)
        })
    }

    pub fn list(&self) -> Result<Vec<TenantHalt>, WardenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT tenant_id, reason, halted_at FROM tenant_halts ORDER BY halted_at")
                .map_err(|e| WardenError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(TenantHalt {
                        tenant_id: row.get(0)?,
                        reason: row.get(1)?,
                        halted_at: Timestamp(row.get(2)?),
                    })
                })
                .map_err(|e| WardenError::Storage(e.to_string()))?;

            let mut halts = Vec::new();
            for row in rows {
                halts.push(row.map_err(|e| WardenError::Storage(e.to_string()))?);
            }
            Ok(halts)
        })
    }
}
