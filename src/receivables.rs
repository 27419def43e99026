//! Receivables: unpaid installment balances surfaced for collection.
//!
//! Builds a read-only projection over completed Home Credit / Skyro /
//! in-house sales that still carry a balance, across both item categories.
//! The projection is rebuilt on every query and never persisted. Partner
//! balances are settled in a best-effort batch; in-house balances are always
//! routed through the installment ledger's payment path instead.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{EngineError, EngineResult};
use crate::installments;
use crate::models::{ItemCategory, PaymentDetails, StoredSale, TransactionType};
use crate::sales;

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// One unpaid balance, joined from a sale and its payment details.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivableItem {
    pub sale_id: String,
    pub category: ItemCategory,
    pub date: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub transaction_type: TransactionType,
    pub downpayment: f64,
    /// Partner methods: the stored lump balance. In-house: the remaining
    /// balance derived from the payment history.
    pub balance: f64,
    /// Balance net of any Brand-Zero subsidy (what the store actually waits
    /// on); equals `balance` for in-house.
    pub net_receivable: f64,
    pub timestamp: i64,
}

impl ReceivableItem {
    /// Which side of the selection-exclusivity rule this item falls on.
    pub fn selection_kind(&self) -> SelectionKind {
        match self.transaction_type {
            TransactionType::InHouseInstallment => SelectionKind::InHouse,
            _ => SelectionKind::PartnerFinanced,
        }
    }
}

/// List every unpaid receivable across both categories, newest first.
///
/// The two category scans are independent reads joined before the merge.
pub fn list_receivables(db: &DbState) -> EngineResult<Vec<ReceivableItem>> {
    let conn = db.lock()?;

    let mut items = scan_category(&conn, ItemCategory::Device)?;
    items.extend(scan_category(&conn, ItemCategory::Accessory)?);
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(items)
}

fn scan_category(conn: &Connection, category: ItemCategory) -> EngineResult<Vec<ReceivableItem>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, category, record_json FROM sales
             WHERE category = ?1 AND status = 'completed'
               AND transaction_type != 'cash' AND balance_unpaid = 1
             ORDER BY timestamp DESC",
        )
        .map_err(|e| EngineError::store(format!("prepare receivables query: {e}")))?;

    let rows = stmt
        .query_map(params![category.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| EngineError::store(format!("query receivables: {e}")))?;

    let mut items = Vec::new();
    for row in rows {
        let (id, cat, record_json) =
            row.map_err(|e| EngineError::store(format!("read receivable row: {e}")))?;
        let sale = sales::decode_sale_row(id, &cat, &record_json)?;
        if let Some(item) = project(&sale)? {
            items.push(item);
        }
    }
    Ok(items)
}

/// Project a sale into a receivable. Cash sales and settled balances yield
/// nothing; the index column is a hint, the record is authoritative.
fn project(sale: &StoredSale) -> EngineResult<Option<ReceivableItem>> {
    let record = &sale.record;
    let item = match record.payment_details()? {
        PaymentDetails::Cash(_) => None,
        PaymentDetails::HomeCredit(d) | PaymentDetails::Skyro(d) => {
            if d.is_balance_paid {
                None
            } else {
                Some(ReceivableItem {
                    sale_id: sale.id.clone(),
                    category: sale.category,
                    date: record.date.clone(),
                    device_id: record.device_id.clone(),
                    customer_name: None,
                    transaction_type: record.transaction_type,
                    downpayment: d.downpayment_amount,
                    balance: d.balance,
                    net_receivable: (d.balance - d.brand_zero_subsidy).max(0.0),
                    timestamp: record.timestamp,
                })
            }
        }
        PaymentDetails::InHouse(d) => {
            if d.is_balance_paid {
                None
            } else {
                let remaining = installments::remaining_balance(d, record.final_price);
                Some(ReceivableItem {
                    sale_id: sale.id.clone(),
                    category: sale.category,
                    date: record.date.clone(),
                    device_id: record.device_id.clone(),
                    customer_name: Some(d.customer_name.clone()),
                    transaction_type: record.transaction_type,
                    downpayment: d.downpayment_amount,
                    balance: remaining,
                    net_receivable: remaining,
                    timestamp: record.timestamp,
                })
            }
        }
    };
    Ok(item)
}

// ---------------------------------------------------------------------------
// Selection rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Home Credit / Skyro: any number may be selected together.
    PartnerFinanced,
    /// In-house: exactly one, alone.
    InHouse,
}

/// Tracks the operator's current selection and enforces the exclusivity
/// rule: zero or more partner-financed items together, or exactly one
/// in-house item alone. A violating attempt is rejected and the selection is
/// left as it was.
#[derive(Debug, Default)]
pub struct SelectionState {
    partner: BTreeSet<String>,
    in_house: Option<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_select(&mut self, kind: SelectionKind, sale_id: &str) -> EngineResult<()> {
        match kind {
            SelectionKind::PartnerFinanced => {
                if self.in_house.is_some() {
                    return Err(EngineError::validation(
                        "an in-house item is selected; settle it on its own first",
                    ));
                }
                self.partner.insert(sale_id.to_string());
            }
            SelectionKind::InHouse => {
                if !self.partner.is_empty() {
                    return Err(EngineError::validation(
                        "in-house balances must be selected alone",
                    ));
                }
                if self.in_house.as_deref().is_some_and(|id| id != sale_id) {
                    return Err(EngineError::validation(
                        "only one in-house balance may be selected at a time",
                    ));
                }
                self.in_house = Some(sale_id.to_string());
            }
        }
        Ok(())
    }

    pub fn deselect(&mut self, sale_id: &str) {
        self.partner.remove(sale_id);
        if self.in_house.as_deref() == Some(sale_id) {
            self.in_house = None;
        }
    }

    pub fn clear(&mut self) {
        self.partner.clear();
        self.in_house = None;
    }

    pub fn is_empty(&self) -> bool {
        self.partner.is_empty() && self.in_house.is_none()
    }

    /// Selected partner-financed sale ids (the bulk-settle input).
    pub fn partner_selection(&self) -> Vec<String> {
        self.partner.iter().cloned().collect()
    }

    /// The selected in-house sale, if any (routes to `record_payment`).
    pub fn in_house_selection(&self) -> Option<&str> {
        self.in_house.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Bulk settlement
// ---------------------------------------------------------------------------

/// Outcome for one sale in a settlement batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleItemResult {
    pub sale_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results of a settlement batch. Deliberately never collapsed into
/// a single pass/fail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSettleOutcome {
    pub results: Vec<SettleItemResult>,
    pub success_count: usize,
    pub fail_count: usize,
}

/// Mark the selected partner-financed balances as paid.
///
/// Best-effort batch: each sale is flipped in its own transaction, and a
/// failure on one item never rolls back the others. In-house items always
/// fail here; they go through `installments::record_payment`.
pub fn settle_partner_financed(db: &DbState, sale_ids: &[String]) -> EngineResult<BatchSettleOutcome> {
    let conn = db.lock()?;

    let mut results = Vec::with_capacity(sale_ids.len());
    for sale_id in sale_ids {
        match settle_one(&conn, sale_id) {
            Ok(()) => results.push(SettleItemResult {
                sale_id: sale_id.clone(),
                success: true,
                error: None,
            }),
            Err(e) => {
                warn!(sale_id = %sale_id, error = %e, "Settlement failed for item");
                results.push(SettleItemResult {
                    sale_id: sale_id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let success_count = results.iter().filter(|r| r.success).count();
    let fail_count = results.len() - success_count;
    info!(success_count, fail_count, "Receivables settlement batch finished");

    Ok(BatchSettleOutcome {
        results,
        success_count,
        fail_count,
    })
}

fn settle_one(conn: &Connection, sale_id: &str) -> EngineResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<()> {
        let mut sale = sales::get_sale_with_conn(conn, sale_id)?;

        let transaction_type = sale.record.transaction_type;
        let details = match transaction_type {
            TransactionType::HomeCredit => sale.record.home_credit_payment.as_mut(),
            TransactionType::Skyro => sale.record.skyro_payment.as_mut(),
            TransactionType::Cash => {
                return Err(EngineError::validation(format!(
                    "sale {sale_id} is a cash sale with no balance"
                )))
            }
            TransactionType::InHouseInstallment => {
                return Err(EngineError::validation(format!(
                    "sale {sale_id} is in-house; record an installment payment instead"
                )))
            }
        };
        let details = details.ok_or_else(|| {
            EngineError::store(format!(
                "sale record missing {} details",
                transaction_type.as_str()
            ))
        })?;

        if details.is_balance_paid {
            return Err(EngineError::conflict(format!(
                "sale {sale_id} balance already settled"
            )));
        }
        details.is_balance_paid = true;

        sales::persist_sale_update(conn, &sale, &format!("sale:{sale_id}:settle"))
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| EngineError::store(format!("commit: {e}")))?;
            Ok(())
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
