//! Append-only audit ledger storage.
//!
//! The table rejects UPDATE and DELETE at the database level, so this
//! repository only ever appends and reads.

use std::sync::Arc;

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use warden_core::error::WardenError;
use warden_core::types::{AuditEntry, Timestamp};
use warden_core::AuditAction;

use crate::db::Database;
use crate::intents::parse_uuid;

/// Filters for reading the ledger.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tenant_id: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<u32>,
}

/// Repository for audit entries.
#[derive(Clone)]
pub struct AuditRepository {
    db: Arc<Database>,
}

impl AuditRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one entry.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), WardenError> {
        let meta = serde_json::to_string(&entry.meta)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_entries (id, tenant_id, actor, action, entity_type, entity_id,
                                            level, message, meta, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    entry.id.to_string(),
                    entry.tenant_id,
                    entry.actor,
                    entry.action.as_str(),
                    entry.entity_type.as_str(),
                    entry.entity_id,
                    entry.level.as_str(),
                    entry.message,
                    meta,
                    entry.timestamp.0,
                ],
            )
            .map_err(|e| WardenError::Storage(format!("Failed to append audit entry: {}", e)))?;
            Ok(())
        })
    }

    /// Read entries in the order they were written.
    pub fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, WardenError> {
        let mut sql = String::from(
            "SELECT id, tenant_id, actor, action, entity_type, entity_id, level, message, meta, timestamp
             FROM audit_entries WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();
        if let Some(ref tenant) = filter.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(Value::Text(tenant.clone()));
        }
        if let Some(ref entity) = filter.entity_id {
            sql.push_str(" AND entity_id = ?");
            values.push(Value::Text(entity.clone()));
        }
        if let Some(action) = filter.action {
            sql.push_str(" AND action = ?");
            values.push(Value::Text(action.as_str().to_string()));
        }
        sql.push_str(" ORDER BY timestamp ASC, rowid ASC LIMIT ?");
        values.push(Value::Integer(i64::from(filter.limit.unwrap_or(1000))));

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| WardenError::Storage(format!("Audit query prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok(row_to_entry(row)))
                .map_err(|e| WardenError::Storage(format!("Audit query: {}", e)))?;

            let mut entries = Vec::new();
            for row in rows {
                let entry = row.map_err(|e| WardenError::Storage(e.to_string()))??;
                entries.push(entry);
            }
            Ok(entries)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<AuditEntry, WardenError> {
    let get_err = |e: rusqlite::Error| WardenError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let action: String = row.get(3).map_err(get_err)?;
    let entity_type: String = row.get(4).map_err(get_err)?;
    let level: String = row.get(6).map_err(get_err)?;
    let meta: String = row.get(8).map_err(get_err)?;

    Ok(AuditEntry {
        id: parse_uuid(&id)?,
        tenant_id: row.get(1).map_err(get_err)?,
        actor: row.get(2).map_err(get_err)?,
        action: action.parse().map_err(WardenError::Storage)?,
        entity_type: entity_type.parse().map_err(WardenError::Storage)?,
        entity_id: row.get(5).map_err(get_err)?,
        level: level.parse().map_err(WardenError::Storage)?,
        message: row.get(7).map_err(get_err)?,
        meta: serde_json::from_str(&meta)?,
        timestamp: Timestamp(row.get(9).map_err(get_err)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::types::{AuditLevel, EntityType};

    fn repo() -> AuditRepository {
        AuditRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_append_and_list_in_order() {
        let repo = repo();
        let first = AuditEntry::new(
            "acme",
            "worker-1",
            AuditAction::IntentClaimed,
            EntityType::Intent,
            "i-1",
        );
        let second = AuditEntry::new(
            "acme",
            "worker-1",
            AuditAction::Executed,
            EntityType::Intent,
            "i-1",
        )
        .with_message("done")
        .with_meta(json!({"workflow": "noop.echo"}));
        repo.append(&first).unwrap();
        repo.append(&second).unwrap();

        let entries = repo
            .list(&AuditFilter {
                entity_id: Some("i-1".to_string()),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(entries, vec![first, second]);
    }

    #[test]
    fn test_filter_by_action_and_tenant() {
        let repo = repo();
        repo.append(&AuditEntry::new(
            "acme",
            "w",
            AuditAction::ExecutionBlocked,
            EntityType::Intent,
            "i-1",
        ))
        .unwrap();
        repo.append(&AuditEntry::new(
            "globex",
            "w",
            AuditAction::ExecutionBlocked,
            EntityType::Intent,
            "i-2",
        ))
        .unwrap();

        let blocked = repo
            .list(&AuditFilter {
                tenant_id: Some("acme".to_string()),
                action: Some(AuditAction::ExecutionBlocked),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].level, AuditLevel::Security);
        assert_eq!(blocked[0].entity_id, "i-1");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let repo = repo();
        let entry = AuditEntry::new("acme", "w", AuditAction::Failed, EntityType::Intent, "i");
        repo.append(&entry).unwrap();
        assert!(repo.append(&entry).is_err());
    }
}
