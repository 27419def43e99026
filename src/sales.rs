//! Sale lifecycle for the ledger engine.
//!
//! A sale is created atomically at checkout with every derived field baked in
//! (pricing, balances, display dates); it is deleted only by explicit
//! operator action and never updated afterwards except for the in-house
//! payment-tracking fields owned by the installment ledger. Each write lands
//! the wire document in `sales.record_json` and enqueues it on the sync
//! outbox in the same transaction.

use chrono::{Datelike, Utc};
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    display_date, display_time, month_name, parse_wire_date, AccountDetails, CashDetails,
    InHouseDetails, InstallmentDetails, ItemCategory, PaymentSource, SaleRecord, SaleStatus,
    StoredSale, TransactionType,
};
use crate::pricing::{self, MethodPricing, PricingInput};

// ---------------------------------------------------------------------------
// Checkout input
// ---------------------------------------------------------------------------

/// Method-specific checkout fields.
#[derive(Debug, Clone)]
pub enum PaymentInput {
    Cash {
        payment_source: PaymentSource,
        account_details: AccountDetails,
    },
    HomeCredit(PartnerFinancedInput),
    Skyro(PartnerFinancedInput),
    InHouse {
        customer_name: String,
        downpayment_amount: f64,
        downpayment_source: PaymentSource,
        account_details: AccountDetails,
        interest_percent: f64,
        months_to_pay: u32,
    },
}

/// Home Credit / Skyro checkout fields.
#[derive(Debug, Clone)]
pub struct PartnerFinancedInput {
    pub downpayment_amount: f64,
    pub downpayment_source: PaymentSource,
    pub account_details: AccountDetails,
    pub brand_zero: bool,
    pub subsidy_percent: f64,
}

/// Raw checkout payload from the presentation layer.
#[derive(Debug, Clone)]
pub struct NewSaleInput {
    pub category: ItemCategory,
    /// Calendar date of the sale, YYYY-MM-DD.
    pub date: String,
    /// Operator; falls back to the `operator.name` setting.
    pub user: Option<String>,
    /// Branch/location; falls back to the `operator.location` setting.
    pub user_location: Option<String>,
    pub device_id: String,
    pub price: f64,
    pub discount_amount: Option<f64>,
    pub discount_percent: Option<f64>,
    pub payment: PaymentInput,
}

impl PaymentInput {
    fn transaction_type(&self) -> TransactionType {
        match self {
            PaymentInput::Cash { .. } => TransactionType::Cash,
            PaymentInput::HomeCredit(_) => TransactionType::HomeCredit,
            PaymentInput::Skyro(_) => TransactionType::Skyro,
            PaymentInput::InHouse { .. } => TransactionType::InHouseInstallment,
        }
    }

    fn downpayment_amount(&self) -> f64 {
        match self {
            PaymentInput::Cash { .. } => 0.0,
            PaymentInput::HomeCredit(p) | PaymentInput::Skyro(p) => p.downpayment_amount,
            PaymentInput::InHouse {
                downpayment_amount, ..
            } => *downpayment_amount,
        }
    }
}

/// Result of a checkout: the stored sale plus any pricing clamp warnings for
/// the operator notice.
#[derive(Debug)]
pub struct CreatedSale {
    pub sale: StoredSale,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Create a sale at checkout.
///
/// Runs the pricing calculator, bakes all derived fields into the wire
/// record, inserts the row and enqueues the sync document atomically.
pub fn create_sale(db: &DbState, input: &NewSaleInput) -> EngineResult<CreatedSale> {
    let conn = db.lock()?;

    let sale_date = parse_wire_date(&input.date)?;

    let (interest_percent, months_to_pay) = match &input.payment {
        PaymentInput::InHouse {
            interest_percent,
            months_to_pay,
            ..
        } => (*interest_percent, *months_to_pay),
        _ => (0.0, 0),
    };

    let priced = pricing::compute_pricing(&PricingInput {
        price: input.price,
        discount_amount: input.discount_amount,
        discount_percent: input.discount_percent,
        transaction_type: input.payment.transaction_type(),
        downpayment_amount: input.payment.downpayment_amount(),
        interest_percent,
        months_to_pay,
    });

    let user = input
        .user
        .clone()
        .or_else(|| db::get_setting(&conn, "operator", "name"))
        .unwrap_or_else(|| "unknown".to_string());
    let user_location = input
        .user_location
        .clone()
        .or_else(|| db::get_setting(&conn, "operator", "location"))
        .unwrap_or_else(|| "unknown".to_string());

    let now = Utc::now();
    let timestamp = now.timestamp_millis();

    let mut record = SaleRecord {
        date: input.date.clone(),
        month: month_name(sale_date.month()).to_string(),
        year: sale_date.year(),
        date_sold: display_date(sale_date),
        time: display_time(timestamp),
        timestamp,
        sort_order: 0,
        user,
        user_location,
        device_id: input.device_id.clone(),
        price: priced.price,
        discount_amount: priced.discount_amount,
        discount_percent: priced.discount_percent,
        final_price: priced.final_price,
        transaction_type: input.payment.transaction_type(),
        status: SaleStatus::Completed,
        cash_payment: None,
        home_credit_payment: None,
        skyro_payment: None,
        in_house_installment: None,
    };

    match (&input.payment, &priced.method) {
        (
            PaymentInput::Cash {
                payment_source,
                account_details,
            },
            MethodPricing::Cash { amount_due },
        ) => {
            record.cash_payment = Some(CashDetails {
                amount_paid: *amount_due,
                payment_source: *payment_source,
                account_details: account_details.clone(),
            });
        }
        (
            PaymentInput::HomeCredit(partner) | PaymentInput::Skyro(partner),
            MethodPricing::PartnerFinanced {
                downpayment,
                balance,
            },
        ) => {
            let details = partner_details(partner, *downpayment, *balance);
            match input.payment.transaction_type() {
                TransactionType::HomeCredit => record.home_credit_payment = Some(details),
                _ => record.skyro_payment = Some(details),
            }
        }
        (
            PaymentInput::InHouse {
                customer_name,
                downpayment_source,
                account_details,
                ..
            },
            MethodPricing::InHouse {
                downpayment,
                interest_percent,
                interest_amount,
                months_to_pay,
                monthly_amount,
                total_amount_due,
            },
        ) => {
            record.in_house_installment = Some(InHouseDetails {
                customer_name: customer_name.clone(),
                downpayment_amount: *downpayment,
                downpayment_source: *downpayment_source,
                account_details: account_details.clone(),
                interest_percent: *interest_percent,
                interest_amount: Some(*interest_amount),
                months_to_pay: *months_to_pay,
                monthly_amount: *monthly_amount,
                balance: *total_amount_due,
                total_amount_due: Some(*total_amount_due),
                is_balance_paid: false,
                remaining_balance: Some(*total_amount_due),
                payments: Vec::new(),
            });
        }
        // compute_pricing derives the method variant from the transaction
        // type, so the pairs above are exhaustive.
        _ => {
            return Err(EngineError::store(
                "pricing method does not match payment input".to_string(),
            ))
        }
    }

    let id = Uuid::new_v4().to_string();
    let record_json = serde_json::to_value(&record)?;
    let now_str = now.to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<()> {
        conn.execute(
            "INSERT INTO sales (
                id, category, sale_date, status, transaction_type, timestamp,
                balance_unpaid, sort_order, record_json, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
            params![
                id,
                input.category.as_str(),
                record.date,
                record.status.as_str(),
                record.transaction_type.as_str(),
                record.timestamp,
                record.has_unpaid_balance() as i64,
                record_json.to_string(),
                now_str,
            ],
        )
        .map_err(|e| EngineError::store(format!("insert sale: {e}")))?;

        db::enqueue_sync(
            &conn,
            "sale",
            &id,
            "insert",
            &record_json,
            &format!("sale:{id}"),
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
        sale_id = %id,
        category = input.category.as_str(),
        transaction_type = record.transaction_type.as_str(),
        final_price = record.final_price,
        "Sale created"
    );

    Ok(CreatedSale {
        sale: StoredSale {
            id,
            category: input.category,
            record,
        },
        warnings: priced.warnings,
    })
}

fn partner_details(
    partner: &PartnerFinancedInput,
    downpayment: f64,
    balance: f64,
) -> InstallmentDetails {
    let subsidy_percent = partner.subsidy_percent.clamp(0.0, 100.0);
    let brand_zero_subsidy = if partner.brand_zero {
        pricing::round2(balance * subsidy_percent / 100.0)
    } else {
        0.0
    };
    InstallmentDetails {
        downpayment_amount: downpayment,
        downpayment_source: partner.downpayment_source,
        account_details: partner.account_details.clone(),
        balance,
        is_balance_paid: false,
        brand_zero: partner.brand_zero,
        brand_zero_subsidy,
        subsidy_percent: if partner.brand_zero { subsidy_percent } else { 0.0 },
    }
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

pub(crate) fn decode_sale_row(
    id: String,
    category: &str,
    record_json: &str,
) -> EngineResult<StoredSale> {
    Ok(StoredSale {
        id,
        category: ItemCategory::parse(category)?,
        record: serde_json::from_str(record_json)?,
    })
}

/// Load a sale by id, with the connection already held (used inside
/// transactions by the installment ledger and receivables settlement).
pub(crate) fn get_sale_with_conn(conn: &Connection, sale_id: &str) -> EngineResult<StoredSale> {
    let row = conn
        .query_row(
            "SELECT id, category, record_json FROM sales WHERE id = ?1",
            params![sale_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                EngineError::not_found(format!("sale {sale_id}"))
            }
            other => EngineError::store(format!("load sale: {other}")),
        })?;
    decode_sale_row(row.0, &row.1, &row.2)
}

/// Get a single sale by id.
pub fn get_sale(db: &DbState, sale_id: &str) -> EngineResult<StoredSale> {
    let conn = db.lock()?;
    get_sale_with_conn(&conn, sale_id)
}

/// List one category's sales for a date and status, ordered by creation
/// instant (the store's query contract: equality on date and status, ordered
/// by timestamp).
pub fn list_sales(
    db: &DbState,
    category: ItemCategory,
    date: &str,
    status: SaleStatus,
) -> EngineResult<Vec<StoredSale>> {
    let conn = db.lock()?;
    list_sales_with_conn(&conn, category, date, status)
}

pub(crate) fn list_sales_with_conn(
    conn: &Connection,
    category: ItemCategory,
    date: &str,
    status: SaleStatus,
) -> EngineResult<Vec<StoredSale>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, category, record_json FROM sales
             WHERE category = ?1 AND sale_date = ?2 AND status = ?3
             ORDER BY timestamp ASC",
        )
        .map_err(|e| EngineError::store(format!("prepare sales query: {e}")))?;

    let rows = stmt
        .query_map(params![category.as_str(), date, status.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| EngineError::store(format!("query sales: {e}")))?;

    let mut sales = Vec::new();
    for row in rows {
        let (id, category, record_json) =
            row.map_err(|e| EngineError::store(format!("read sale row: {e}")))?;
        sales.push(decode_sale_row(id, &category, &record_json)?);
    }
    Ok(sales)
}

// ---------------------------------------------------------------------------
// Update (payment-tracking fields only)
// ---------------------------------------------------------------------------

/// Rewrite a sale's wire document and derived columns and enqueue the update.
/// Only the installment ledger and receivables settlement call this; nothing
/// else ever mutates a stored sale.
pub(crate) fn persist_sale_update(
    conn: &Connection,
    sale: &StoredSale,
    idempotency_key: &str,
) -> EngineResult<()> {
    let record_json = serde_json::to_value(&sale.record)?;
    let updated = conn
        .execute(
            "UPDATE sales SET
                record_json = ?1,
                balance_unpaid = ?2,
                sort_order = ?3,
                updated_at = ?4
             WHERE id = ?5",
            params![
                record_json.to_string(),
                sale.record.has_unpaid_balance() as i64,
                sale.record.sort_order,
                Utc::now().to_rfc3339(),
                sale.id,
            ],
        )
        .map_err(|e| EngineError::store(format!("update sale: {e}")))?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("sale {}", sale.id)));
    }

    db::enqueue_sync(conn, "sale", &sale.id, "update", &record_json, idempotency_key)
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Delete a sale (explicit operator action only).
pub fn delete_sale(db: &DbState, sale_id: &str) -> EngineResult<()> {
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<()> {
        let deleted = conn
            .execute("DELETE FROM sales WHERE id = ?1", params![sale_id])
            .map_err(|e| EngineError::store(format!("delete sale: {e}")))?;
        if deleted == 0 {
            return Err(EngineError::not_found(format!("sale {sale_id}")));
        }

        db::enqueue_sync(
            &conn,
            "sale",
            sale_id,
            "delete",
            &serde_json::json!({ "id": sale_id }),
            &format!("sale:{sale_id}:delete"),
        )
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| EngineError::store(format!("commit: {e}")))?;
            info!(sale_id = %sale_id, "Sale deleted");
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
