//! Service ledger entries.
//!
//! Repairs, load wallet top-ups, misc income, and petty-cash outflows are
//! recorded as credit/debit entries against a calendar date. The daily
//! reconciliation engine folds them into the cash-flow and ledger summaries.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    parse_wire_date, PaymentSource, SaleStatus, ServiceCategory, ServiceEntry, ServiceEntryType,
    StoredServiceEntry,
};

/// New-entry payload from the presentation layer.
#[derive(Debug, Clone)]
pub struct NewServiceEntry {
    /// Calendar date, YYYY-MM-DD.
    pub date: String,
    pub description: String,
    pub entry_type: ServiceEntryType,
    pub category: ServiceCategory,
    pub amount: f64,
    pub payment_source: PaymentSource,
    /// Falls back to the `operator.name` setting.
    pub recorded_by: Option<String>,
}

/// Record one service-ledger entry.
pub fn record_service_entry(
    db: &DbState,
    input: &NewServiceEntry,
) -> EngineResult<StoredServiceEntry> {
    let conn = db.lock()?;

    parse_wire_date(&input.date)?;
    if input.amount <= 0.0 {
        return Err(EngineError::validation(format!(
            "service amount must be positive, got {}",
            input.amount
        )));
    }
    // Services settle over the counter; there is no bank-transfer or
    // credit-card bucket on the service ledger.
    if matches!(
        input.payment_source,
        PaymentSource::BankTransfer | PaymentSource::CreditCard
    ) {
        return Err(EngineError::validation(format!(
            "payment source {} is not available for service entries",
            input.payment_source.as_str()
        )));
    }

    let recorded_by = input
        .recorded_by
        .clone()
        .or_else(|| db::get_setting(&conn, "operator", "name"))
        .unwrap_or_else(|| "unknown".to_string());

    let now = Utc::now();
    let entry = ServiceEntry {
        date: input.date.clone(),
        description: input.description.clone(),
        entry_type: input.entry_type,
        category: input.category,
        amount: input.amount,
        payment_source: input.payment_source,
        status: SaleStatus::Completed,
        recorded_by,
        timestamp: now.timestamp_millis(),
    };

    let id = Uuid::new_v4().to_string();
    let record_json = serde_json::to_value(&entry)?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<()> {
        conn.execute(
            "INSERT INTO service_entries (
                id, entry_date, status, entry_type, amount, timestamp, record_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                entry.date,
                entry.status.as_str(),
                entry.entry_type.as_str(),
                entry.amount,
                entry.timestamp,
                record_json.to_string(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| EngineError::store(format!("insert service entry: {e}")))?;

        db::enqueue_sync(
            &conn,
            "service_entry",
            &id,
            "insert",
            &record_json,
            &format!("service:{id}"),
        )
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| EngineError::store(format!("commit: {e}")))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        entry_id = %id,
        entry_type = entry.entry_type.as_str(),
        amount = entry.amount,
        "Service entry recorded"
    );

    Ok(StoredServiceEntry { id, entry })
}

/// List service entries for a date and status, ordered by creation instant.
pub fn list_service_entries(
    db: &DbState,
    date: &str,
    status: SaleStatus,
) -> EngineResult<Vec<StoredServiceEntry>> {
    let conn = db.lock()?;
    list_service_entries_with_conn(&conn, date, status)
}

pub(crate) fn list_service_entries_with_conn(
    conn: &Connection,
    date: &str,
    status: SaleStatus,
) -> EngineResult<Vec<StoredServiceEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, record_json FROM service_entries
             WHERE entry_date = ?1 AND status = ?2
             ORDER BY timestamp ASC",
        )
        .map_err(|e| EngineError::store(format!("prepare service query: {e}")))?;

    let rows = stmt
        .query_map(params![date, status.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| EngineError::store(format!("query service entries: {e}")))?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, record_json) =
            row.map_err(|e| EngineError::store(format!("read service row: {e}")))?;
        entries.push(StoredServiceEntry {
            id,
            entry: serde_json::from_str(&record_json)?,
        });
    }
    Ok(entries)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn entry(entry_type: ServiceEntryType, amount: f64) -> NewServiceEntry {
        NewServiceEntry {
            date: "2026-08-06".into(),
            description: "screen replacement".into(),
            entry_type,
            category: ServiceCategory::Service,
            amount,
            payment_source: PaymentSource::Cash,
            recorded_by: Some("ana".into()),
        }
    }

    #[test]
    fn test_record_and_list() {
        let db = test_db();
        let credit = record_service_entry(&db, &entry(ServiceEntryType::Credit, 800.0))
            .expect("record credit");
        record_service_entry(&db, &entry(ServiceEntryType::Debit, 300.0)).expect("record debit");

        let listed =
            list_service_entries(&db, "2026-08-06", SaleStatus::Completed).expect("list entries");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, credit.id);
        assert_eq!(listed[0].entry.amount, 800.0);

        // Wire shape
        let conn = db.conn.lock().unwrap();
        let payload: String = conn
            .query_row(
                "SELECT payload FROM sync_queue WHERE entity_id = ?1",
                params![credit.id],
                |row| row.get(0),
            )
            .unwrap();
        let wire: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(wire["entryType"], "credit");
        assert_eq!(wire["paymentSource"], "cash");
        assert_eq!(wire["recordedBy"], "ana");
    }

    #[test]
    fn test_rejects_bad_input() {
        let db = test_db();

        let zero = entry(ServiceEntryType::Credit, 0.0);
        assert!(matches!(
            record_service_entry(&db, &zero),
            Err(EngineError::Validation(_))
        ));

        let mut card = entry(ServiceEntryType::Credit, 100.0);
        card.payment_source = PaymentSource::CreditCard;
        assert!(matches!(
            record_service_entry(&db, &card),
            Err(EngineError::Validation(_))
        ));

        let mut bad_date = entry(ServiceEntryType::Credit, 100.0);
        bad_date.date = "Aug 6".into();
        assert!(matches!(
            record_service_entry(&db, &bad_date),
            Err(EngineError::Validation(_))
        ));
    }
}
