//! Durable intent queue.
//!
//! Every status change is a conditional `UPDATE ... WHERE status = ?` and is
//! reported as successful only when exactly one row changed. That single
//! compare-and-set is what keeps an intent owned by one worker at a time.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::error::WardenError;
use warden_core::types::{Decision, Intent, IntentStatus, Timestamp};

use crate::db::Database;

const INTENT_COLUMNS: &str = "id, tenant_id, actor, payload, data_class, spend_usd, spend_reported,
     status, sgl_result, approved_memo_id, claimed_by, lease_expires_at, attempts,
     last_error, created_at, updated_at";

/// Matches rows a worker may take: queued, or owned under an expired lease.
const CLAIMABLE: &str =
    "(status = 'DRAFT' OR (status = 'VALIDATING' AND lease_expires_at < :now))";

/// Parameters for a single claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pub worker_id: &'a str,
    pub lease_secs: u64,
    /// Tenants whose privileged processing is halted.
    pub excluded_tenants: &'a [String],
    /// Candidates tried before reporting nothing claimable.
    pub max_attempts: u32,
}

/// Filters for listing intents.
#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    pub tenant_id: Option<String>,
    pub status: Option<IntentStatus>,
    pub limit: Option<u32>,
}

/// Repository for queued and processed intents.
#[derive(Clone)]
pub struct IntentRepository {
    db: Arc<Database>,
}

impl IntentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new intent.
    pub fn insert(&self, intent: &Intent) -> Result<(), WardenError> {
        let payload = serde_json::to_string(&intent.payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO intents (id, tenant_id, actor, intent_type, payload, data_class,
                                      spend_usd, spend_reported, status, sgl_result,
                                      approved_memo_id, claimed_by, lease_expires_at, attempts,
                                      last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    intent.id.to_string(),
                    intent.tenant_id,
                    intent.actor,
                    intent.intent_type().as_str(),
                    payload,
                    intent.data_class.as_str(),
                    intent.spend_usd,
                    intent.spend_reported,
                    intent.status.as_str(),
                    intent.sgl_result.map(|d| d.as_str()),
                    intent.approved_memo_id.map(|m| m.to_string()),
                    intent.claimed_by,
                    intent.lease_expires_at.map(|t| t.0),
                    intent.attempts,
                    intent.last_error,
                    intent.created_at.0,
                    intent.updated_at.0,
                ],
            )
            .map_err(|e| WardenError::Storage(format!("Failed to insert intent: {}", e)))?;
            Ok(())
        })
    }

    /// Find an intent by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<Intent>, WardenError> {
        self.db.with_conn(|conn| fetch_intent(conn, &id.to_string()))
    }

    /// List intents, newest first.
    pub fn list(&self, filter: &IntentFilter) -> Result<Vec<Intent>, WardenError> {
        let mut sql = format!("SELECT {} FROM intents WHERE 1 = 1", INTENT_COLUMNS);
        let mut values: Vec<Value> = Vec::new();
        if let Some(ref tenant) = filter.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(Value::Text(tenant.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
        values.push(Value::Integer(i64::from(filter.limit.unwrap_or(100))));

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| WardenError::Storage(format!("Intent list prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok(row_to_intent(row)))
                .map_err(|e| WardenError::Storage(format!("Intent list query: {}", e)))?;

            let mut intents = Vec::new();
            for row in rows {
                let intent = row.map_err(|e| WardenError::Storage(e.to_string()))??;
                intents.push(intent);
            }
            Ok(intents)
        })
    }

    /// Claim the oldest eligible intent for `worker_id`.
    ///
    /// Candidates are read oldest-first, then each is taken with a
    /// conditional update that only succeeds if the row is still claimable.
    /// A candidate lost to another worker is skipped. Returns `None` when
    /// nothing could be claimed within `max_attempts` candidates.
    pub fn claim_next(&self, req: &ClaimRequest<'_>) -> Result<Option<Intent>, WardenError> {
        let now = Timestamp::now();
        let lease_expires_at = now.plus_secs(req.lease_secs);

        let mut sql = format!("SELECT id, status FROM intents WHERE {}", CLAIMABLE);
        let mut values: Vec<(String, Value)> = vec![(":now".to_string(), Value::Integer(now.0))];
        if !req.excluded_tenants.is_empty() {
            let names: Vec<String> = (0..req.excluded_tenants.len())
                .map(|i| format!(":t{}", i))
                .collect();
            sql.push_str(&format!(" AND tenant_id NOT IN ({})", names.join(", ")));
            for (name, tenant) in names.into_iter().zip(req.excluded_tenants) {
                values.push((name, Value::Text(tenant.clone())));
            }
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC LIMIT :limit");
        values.push((
            ":limit".to_string(),
            Value::Integer(i64::from(req.max_attempts.max(1))),
        ));

        self.db.with_conn(|conn| {
            let candidates: Vec<(String, String)> = {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| WardenError::Storage(format!("Claim candidates prepare: {}", e)))?;
                let named: Vec<(&str, &dyn rusqlite::ToSql)> = values
                    .iter()
                    .map(|(n, v)| (n.as_str(), v as &dyn rusqlite::ToSql))
                    .collect();
                let rows = stmt
                    .query_map(named.as_slice(), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(|e| WardenError::Storage(format!("Claim candidates query: {}", e)))?;
                let mut found = Vec::new();
                for row in rows {
                    found.push(row.map_err(|e| WardenError::Storage(e.to_string()))?);
                }
                found
            };

            for (id, previous_status) in candidates {
                let changed = conn
                    .execute(
                        &format!(
                            "UPDATE intents
                             SET status = 'VALIDATING', claimed_by = :worker,
                                 lease_expires_at = :lease, attempts = attempts + 1,
                                 updated_at = :now
                             WHERE id = :id AND {}",
                            CLAIMABLE
                        ),
                        rusqlite::named_params! {
                            ":worker": req.worker_id,
                            ":lease": lease_expires_at.0,
                            ":now": now.0,
                            ":id": id,
                        },
                    )
                    .map_err(|e| WardenError::Storage(format!("Claim update failed: {}", e)))?;

                if changed != 1 {
                    debug!(intent_id = %id, worker = req.worker_id, "Claim lost to another worker");
                    continue;
                }
                if previous_status == IntentStatus::Validating.as_str() {
                    warn!(intent_id = %id, worker = req.worker_id, "Reclaimed intent with expired lease");
                }
                return fetch_intent(conn, &id);
            }
            Ok(None)
        })
    }

    /// Store the policy decision on an intent the worker still owns.
    pub fn record_decision(
        &self,
        id: Uuid,
        worker_id: &str,
        decision: Decision,
    ) -> Result<bool, WardenError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE intents SET sgl_result = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'VALIDATING' AND claimed_by = ?4",
                    params![
                        decision.as_str(),
                        Timestamp::now().0,
                        id.to_string(),
                        worker_id
                    ],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to record decision: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Move an owned intent out of `VALIDATING` and release the claim.
    ///
    /// Returns `false` if the worker no longer owns the intent.
    pub fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        to: IntentStatus,
        last_error: Option<&str>,
    ) -> Result<bool, WardenError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE intents
                     SET status = ?1, last_error = ?2, claimed_by = NULL,
                         lease_expires_at = NULL, updated_at = ?3
                     WHERE id = ?4 AND status = 'VALIDATING' AND claimed_by = ?5",
                    params![
                        to.as_str(),
                        last_error,
                        Timestamp::now().0,
                        id.to_string(),
                        worker_id
                    ],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to complete intent: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Push the lease of an owned intent `lease_secs` into the future.
    ///
    /// Returns `false` if the worker no longer owns the intent.
    pub fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_secs: u64,
    ) -> Result<bool, WardenError> {
        let now = Timestamp::now();
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE intents SET lease_expires_at = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'VALIDATING' AND claimed_by = ?4",
                    params![
                        now.plus_secs(lease_secs).0,
                        now.0,
                        id.to_string(),
                        worker_id
                    ],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to renew lease: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Terminate a parked intent after its memo was rejected.
    pub fn fail_parked(&self, id: Uuid, reason: &str) -> Result<bool, WardenError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE intents SET status = 'FAILED', last_error = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'AWAITING_HUMAN'",
                    params![reason, Timestamp::now().0, id.to_string()],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to fail intent: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Intent counts per status, optionally for one tenant.
    pub fn count_by_status(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<(IntentStatus, u64)>, WardenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM intents
                     WHERE ?1 IS NULL OR tenant_id = ?1
                     GROUP BY status ORDER BY status",
                )
                .map_err(|e| WardenError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![tenant_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| WardenError::Storage(e.to_string()))?;

            let mut counts = Vec::new();
            for row in rows {
                let (status, count) = row.map_err(|e| WardenError::Storage(e.to_string()))?;
                let status = IntentStatus::from_str(&status).map_err(WardenError::Storage)?;
                counts.push((status, count.max(0) as u64));
            }
            Ok(counts)
        })
    }
}

fn fetch_intent(conn: &Connection, id: &str) -> Result<Option<Intent>, WardenError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM intents WHERE id = ?1", INTENT_COLUMNS))
        .map_err(|e| WardenError::Storage(e.to_string()))?;

    let result = stmt
        .query_row(params![id], |row| Ok(row_to_intent(row)))
        .optional()
        .map_err(|e| WardenError::Storage(e.to_string()))?;

    result.transpose()
}

fn row_to_intent(row: &rusqlite::Row<'_>) -> Result<Intent, WardenError> {
    let get_err = |e: rusqlite::Error| WardenError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let payload: String = row.get(3).map_err(get_err)?;
    let data_class: String = row.get(4).map_err(get_err)?;
    let status: String = row.get(7).map_err(get_err)?;
    let sgl_result: Option<String> = row.get(8).map_err(get_err)?;
    let approved_memo_id: Option<String> = row.get(9).map_err(get_err)?;
    let lease_expires_at: Option<i64> = row.get(11).map_err(get_err)?;
    let attempts: i64 = row.get(12).map_err(get_err)?;

    Ok(Intent {
        id: parse_uuid(&id)?,
        tenant_id: row.get(1).map_err(get_err)?,
        actor: row.get(2).map_err(get_err)?,
        payload: serde_json::from_str(&payload)?,
        data_class: data_class.parse().map_err(WardenError::Storage)?,
        spend_usd: row.get(5).map_err(get_err)?,
        spend_reported: row.get(6).map_err(get_err)?,
        status: status.parse().map_err(WardenError::Storage)?,
        sgl_result: sgl_result
            .map(|s| s.parse::<Decision>())
            .transpose()
            .map_err(WardenError::Storage)?,
        approved_memo_id: approved_memo_id.as_deref().map(parse_uuid).transpose()?,
        claimed_by: row.get(10).map_err(get_err)?,
        lease_expires_at: lease_expires_at.map(Timestamp),
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.get(13).map_err(get_err)?,
        created_at: Timestamp(row.get(14).map_err(get_err)?),
        updated_at: Timestamp(row.get(15).map_err(get_err)?),
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, WardenError> {
    Uuid::parse_str(s).map_err(|e| WardenError::Storage(format!("Invalid UUID: {}", e)))
}
