//! Manual order ledger.
//!
//! Same-day transaction lists carry an operator-assigned rank (`sortOrder`,
//! 1-based; 0 means unranked). Reordering persists only the ranks that
//! actually changed, which keeps concurrent edits minimally invasive and
//! leaves freshly inserted (unranked) transactions sorting after every
//! manually ranked one.

use chrono::Utc;
use tracing::info;

use crate::db::DbState;
use crate::error::{EngineError, EngineResult};
use crate::models::{ItemCategory, SaleStatus, StoredSale};
use crate::sales;

/// Sort key for a same-day list: unranked rows sort last, ties break by
/// creation instant ascending.
pub fn sort_key(sort_order: i64, timestamp: i64) -> (i64, i64) {
    let rank = if sort_order == 0 { i64::MAX } else { sort_order };
    (rank, timestamp)
}

/// Order a day's sales for display.
pub fn sort_for_display(sales: &mut [StoredSale]) {
    sales.sort_by_key(|s| sort_key(s.record.sort_order, s.record.timestamp));
}

/// Result of a reorder: which sales were actually written.
#[derive(Debug)]
pub struct ReorderOutcome {
    /// Ids whose rank changed, in list order.
    pub updated: Vec<String>,
    /// Ids whose rank already matched and were skipped.
    pub unchanged: usize,
}

/// Apply a manual reorder to one category's list for one date.
///
/// `ordered_ids` is the full list in its new display order; ranks 1..n are
/// assigned positionally and only changed ranks are persisted (diff-based).
pub fn reorder(
    db: &DbState,
    category: ItemCategory,
    date: &str,
    ordered_ids: &[String],
) -> EngineResult<ReorderOutcome> {
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<ReorderOutcome> {
        let current =
            sales::list_sales_with_conn(&conn, category, date, SaleStatus::Completed)?;

        let mut by_id: std::collections::HashMap<String, StoredSale> =
            current.into_iter().map(|s| (s.id.clone(), s)).collect();

        let now_ms = Utc::now().timestamp_millis();
        let mut updated = Vec::new();
        let mut unchanged = 0;

        for (position, sale_id) in ordered_ids.iter().enumerate() {
            let mut sale = by_id.remove(sale_id).ok_or_else(|| {
                EngineError::not_found(format!(
                    "sale {sale_id} in the {} {date} list",
                    category.as_str()
                ))
            })?;

            let new_rank = (position + 1) as i64;
            if sale.record.sort_order == new_rank {
                unchanged += 1;
                continue;
            }

            sale.record.sort_order = new_rank;
            sales::persist_sale_update(
                &conn,
                &sale,
                &format!("sale:{sale_id}:rank:{new_rank}:{now_ms}"),
            )?;
            updated.push(sale_id.clone());
        }

        Ok(ReorderOutcome { updated, unchanged })
    })();

    match result {
        Ok(outcome) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| EngineError::store(format!("commit: {e}")))?;
            info!(
                category = category.as_str(),
                date = %date,
                written = outcome.updated.len(),
                skipped = outcome.unchanged,
                "Manual reorder applied"
            );
            Ok(outcome)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
