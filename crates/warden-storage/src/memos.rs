//! Decision memo persistence.
//!
//! Memos only move forward: `PROPOSED` to `APPROVED` or `REJECTED`, then
//! `APPROVED` to `EXECUTED`. Each move is a conditional update on the
//! expected current status, so a second resolution of the same memo changes
//! nothing and is reported as `false`.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use warden_core::error::WardenError;
use warden_core::types::{DecisionMemo, MemoStatus, Timestamp};

use crate::db::Database;
use crate::intents::parse_uuid;

const MEMO_COLUMNS: &str = "id, tenant_id, intent_id, agent, title, rationale, risk_tier,
     requires_approval, status, payload, spend_usd, decided_by, decision_reason,
     created_at, decided_at, executed_at";

/// Filters for listing memos.
#[derive(Debug, Clone, Default)]
pub struct MemoFilter {
    pub tenant_id: Option<String>,
    pub status: Option<MemoStatus>,
    pub limit: Option<u32>,
}

/// Result of an approval attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Approval<E> {
    /// The memo is now `APPROVED`. `requeued` reports whether its parked
    /// intent went back to `DRAFT` in the same transaction.
    Approved { requeued: bool },
    /// The memo does not exist or is no longer `PROPOSED`.
    NotProposed,
    /// The check refused; nothing was written.
    Refused(E),
}

/// Read access to memo totals from inside an approval transaction.
pub struct ApprovalView<'a> {
    conn: &'a Connection,
}

impl ApprovalView<'_> {
    /// Same as [`MemoRepository::committed_spend`], seen by the transaction.
    pub fn committed_spend(&self, tenant_id: &str, since: Timestamp) -> Result<f64, WardenError> {
        committed_spend_on(self.conn, tenant_id, since)
    }
}

/// Repository for decision memos.
#[derive(Clone)]
pub struct MemoRepository {
    db: Arc<Database>,
}

impl MemoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new memo.
    pub fn insert(&self, memo: &DecisionMemo) -> Result<(), WardenError> {
        let payload = serde_json::to_string(&memo.payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO decision_memos (id, tenant_id, intent_id, agent, title, rationale,
                                             risk_tier, requires_approval, status, payload,
                                             spend_usd, decided_by, decision_reason,
                                             created_at, decided_at, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    memo.id.to_string(),
                    memo.tenant_id,
                    memo.intent_id.map(|i| i.to_string()),
                    memo.agent,
                    memo.title,
                    memo.rationale,
                    memo.risk_tier,
                    memo.requires_approval,
                    memo.status.as_str(),
                    payload,
                    memo.spend_usd,
                    memo.decided_by,
                    memo.decision_reason,
                    memo.created_at.0,
                    memo.decided_at.map(|t| t.0),
                    memo.executed_at.map(|t| t.0),
                ],
            )
            .map_err(|e| WardenError::Storage(format!("Failed to insert memo: {}", e)))?;
            Ok(())
        })
    }

    /// Find a memo by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<DecisionMemo>, WardenError> {
        self.db.with_conn(|conn| fetch_memo(conn, id))
    }

    /// List memos, oldest first.
    pub fn list(&self, filter: &MemoFilter) -> Result<Vec<DecisionMemo>, WardenError> {
        let mut sql = format!("SELECT {} FROM decision_memos WHERE 1 = 1", MEMO_COLUMNS);
        let mut values: Vec<Value> = Vec::new();
        if let Some(ref tenant) = filter.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(Value::Text(tenant.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC LIMIT ?");
        values.push(Value::Integer(i64::from(filter.limit.unwrap_or(100))));

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| WardenError::Storage(format!("Memo list prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok(row_to_memo(row)))
                .map_err(|e| WardenError::Storage(format!("Memo list query: {}", e)))?;

            let mut memos = Vec::new();
            for row in rows {
                let memo = row.map_err(|e| WardenError::Storage(e.to_string()))??;
                memos.push(memo);
            }
            Ok(memos)
        })
    }

    /// Resolve a `PROPOSED` memo as approved or rejected.
    ///
    /// Returns `false` if the memo was not `PROPOSED` anymore.
    pub fn resolve(
        &self,
        id: Uuid,
        to: MemoStatus,
        decided_by: &str,
        reason: Option<&str>,
    ) -> Result<bool, WardenError> {
        if !matches!(to, MemoStatus::Approved | MemoStatus::Rejected) {
            return Err(WardenError::Validation(format!(
                "memo can only be resolved as APPROVED or REJECTED, not {}",
                to
            )));
        }
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE decision_memos
                     SET status = ?1, decided_by = ?2, decision_reason = ?3, decided_at = ?4
                     WHERE id = ?5 AND status = 'PROPOSED'",
                    params![
                        to.as_str(),
                        decided_by,
                        reason,
                        Timestamp::now().0,
                        id.to_string()
                    ],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to resolve memo: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Mark an approved memo as executed.
    pub fn mark_executed(&self, id: Uuid) -> Result<bool, WardenError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE decision_memos SET status = 'EXECUTED', executed_at = ?1
                     WHERE id = ?2 AND status = 'APPROVED'",
                    params![Timestamp::now().0, id.to_string()],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to mark memo executed: {}", e)))?;
            Ok(changed == 1)
        })
    }

    /// Approve a `PROPOSED` memo if `check` allows it, and re-queue its
    /// parked intent.
    ///
    /// The check, the memo update, and the intent update share one
    /// `BEGIN IMMEDIATE` transaction, so concurrent approvals on other
    /// connections see each other's committed spend, and a memo is never
    /// `APPROVED` while its intent stays parked.
    pub fn approve<E, F>(
        &self,
        id: Uuid,
        decided_by: &str,
        check: F,
    ) -> Result<Approval<E>, WardenError>
    where
        F: FnOnce(&DecisionMemo, &ApprovalView<'_>) -> Result<(), E>,
    {
        self.db.with_write_tx(|conn| {
            let memo = match fetch_memo(conn, id)? {
                Some(memo) if memo.status == MemoStatus::Proposed => memo,
                _ => return Ok(Approval::NotProposed),
            };
            if let Err(refusal) = check(&memo, &ApprovalView { conn }) {
                return Ok(Approval::Refused(refusal));
            }

            let now = Timestamp::now().0;
            let changed = conn
                .execute(
                    "UPDATE decision_memos
                     SET status = 'APPROVED', decided_by = ?1, decided_at = ?2
                     WHERE id = ?3 AND status = 'PROPOSED'",
                    params![decided_by, now, id.to_string()],
                )
                .map_err(|e| WardenError::Storage(format!("Failed to approve memo: {}", e)))?;
            if changed != 1 {
                return Ok(Approval::NotProposed);
            }

            let requeued = match memo.intent_id {
                Some(intent_id) => {
                    conn.execute(
                        "UPDATE intents
                         SET status = 'DRAFT', approved_memo_id = ?1, last_error = NULL,
                             updated_at = ?2
                         WHERE id = ?3 AND status = 'AWAITING_HUMAN'",
                        params![id.to_string(), now, intent_id.to_string()],
                    )
                    .map_err(|e| WardenError::Storage(format!("Failed to requeue intent: {}", e)))?
                        == 1
                }
                None => false,
            };
            Ok(Approval::Approved { requeued })
        })
    }

    /// Total spend of a tenant's approved or executed memos decided since `since`.
    pub fn committed_spend(&self, tenant_id: &str, since: Timestamp) -> Result<f64, WardenError> {
        self.db
            .with_conn(|conn| committed_spend_on(conn, tenant_id, since))
    }
}

fn committed_spend_on(
    conn: &Connection,
    tenant_id: &str,
    since: Timestamp,
) -> Result<f64, WardenError> {
    conn.query_row(
        "SELECT COALESCE(SUM(spend_usd), 0.0) FROM decision_memos
         WHERE tenant_id = ?1 AND status IN ('APPROVED', 'EXECUTED') AND decided_at >= ?2",
        params![tenant_id, since.0],
        |row| row.get(0),
    )
    .map_err(|e| WardenError::Storage(format!("Failed to sum committed spend: {}", e)))
}

fn fetch_memo(conn: &Connection, id: Uuid) -> Result<Option<DecisionMemo>, WardenError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM decision_memos WHERE id = ?1",
            MEMO_COLUMNS
        ))
        .map_err(|e| WardenError::Storage(e.to_string()))?;

    let result = stmt
        .query_row(params![id.to_string()], |row| Ok(row_to_memo(row)))
        .optional()
        .map_err(|e| WardenError::Storage(e.to_string()))?;

    result.transpose()
}

fn row_to_memo(row: &rusqlite::Row<'_>) -> Result<DecisionMemo, WardenError> {
    let get_err = |e: rusqlite::Error| WardenError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let intent_id: Option<String> = row.get(2).map_err(get_err)?;
    let risk_tier: i64 = row.get(6).map_err(get_err)?;
    let status: String = row.get(8).map_err(get_err)?;
    let payload: String = row.get(9).map_err(get_err)?;
    let decided_at: Option<i64> = row.get(14).map_err(get_err)?;
    let executed_at: Option<i64> = row.get(15).map_err(get_err)?;

    Ok(DecisionMemo {
        id: parse_uuid(&id)?,
        tenant_id: row.get(1).map_err(get_err)?,
        intent_id: intent_id.as_deref().map(parse_uuid).transpose()?,
        agent: row.get(3).map_err(get_err)?,
        title: row.get(4).map_err(get_err)?,
        rationale: row.get(5).map_err(get_err)?,
        risk_tier: u8::try_from(risk_tier)
            .map_err(|_| WardenError::Storage(format!("Invalid risk tier: {}", risk_tier)))?,
        requires_approval: row.get(7).map_err(get_err)?,
        status: status.parse().map_err(WardenError::Storage)?,
        payload: serde_json::from_str(&payload)?,
        spend_usd: row.get(10).map_err(get_err)?,
        decided_by: row.get(11).map_err(get_err)?,
        decision_reason: row.get(12).map_err(get_err)?,
        created_at: Timestamp(row.get(13).map_err(get_err)?),
        decided_at: decided_at.map(Timestamp),
        executed_at: executed_at.map(Timestamp),
    })
}
