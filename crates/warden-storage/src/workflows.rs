//! Durable workflow mappings.
//!
//! Lets operators add a stable id or canonical key for an existing handler
//! without redeploying the live registry.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use warden_core::error::WardenError;
use warden_core::types::{Timestamp, WorkflowRecord, WorkflowRef};

use crate::db::Database;

#[derive(Clone)]
pub struct WorkflowRepository {
    db: Arc<Database>,
}

impl WorkflowRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a mapping by id.
    pub fn upsert(&self, record: &WorkflowRecord) -> Result<(), WardenError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workflows (id, key, handler, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     key = excluded.key,
                     handler = excluded.handler,
                     description = excluded.description",
                params![
                    record.id,
                    record.key,
                    record.handler,
                    record.description,
                    record.created_at.0
                ],
            )
            .map_err(|e| WardenError::Storage(format!("Failed to save workflow: {}", e)))?;
            Ok(())
        })
    }

    /// Look up a mapping by id or key.
    pub fn find(&self, workflow: &WorkflowRef) -> Result<Option<WorkflowRecord>, WardenError> {
        let (sql, value) = match workflow {
            WorkflowRef::Id(id) => (
                "SELECT id, key, handler, description, created_at FROM workflows WHERE id = ?1",
                id,
            ),
            WorkflowRef::Key(key) => (
                "SELECT id, key, handler, description, created_at FROM workflows WHERE key = ?1",
                key,
            ),
        };
        self.db.with_conn(|conn| {
            conn.query_row(sql, params![value], |row| {
                Ok(WorkflowRecord {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    handler: row.get(2)?,
                    description: row.get(3)?,
                    created_at: Timestamp(row.get(4)?),
                })
            })
            .optional()
            .map_err(|e| WardenError::Storage(format!("Workflow lookup failed: {}", e)))
        })
    }

    pub fn list(&self) -> Result<Vec<WorkflowRecord>, WardenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, key, handler, description, created_at FROM workflows ORDER BY key")
                .map_err(|e| WardenError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(WorkflowRecord {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        handler: row.get(2)?,
                        description: row.get(3)?,
                        created_at: Timestamp(row.get(4)?),
                    })
                })
                .map_err(|e| WardenError::Storage(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|e| WardenError::Storage(e.to_string()))?);
            }
            Ok(records)
        })
    }
}
