//! In-house installment ledger.
//!
//! Tracks a store-financed sale's interest, balance, and partial-payment
//! history over its lifetime. A ledger is Open while it carries a remaining
//! balance and becomes Settled (terminally) once the balance reaches zero.
//! The remaining balance is always re-derived from the payment history; the
//! persisted value is an index-only convenience and is never trusted when the
//! two disagree.

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::db::DbState;
use crate::error::{EngineError, EngineResult};
use crate::models::{InHouseDetails, PaymentRecord, PaymentSource, StoredSale};
use crate::pricing::{round2, MONEY_EPSILON};
use crate::sales;

/// Lifecycle of one in-house ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Open,
    Settled,
}

/// Original balance owed at checkout: `(finalPrice − downpayment) + interest`.
///
/// Migration shim: records written before the interest fields existed lack
/// `totalAmountDue`/`interestAmount`, so the chain re-derives them from
/// whatever is stored, falling back to the final price when no
/// discount/downpayment data exists at all. New records always carry
/// `totalAmountDue` and take the first branch.
pub fn original_balance(details: &InHouseDetails, final_price: f64) -> f64 {
    if let Some(total) = details.total_amount_due {
        if total > 0.0 {
            return total;
        }
    }

    if details.downpayment_amount > 0.0
        || details.interest_amount.is_some()
        || details.interest_percent > 0.0
    {
        let principal = final_price - details.downpayment_amount;
        let interest = details
            .interest_amount
            .unwrap_or_else(|| round2(principal * details.interest_percent / 100.0));
        return round2(principal + interest);
    }

    final_price
}

/// Remaining balance, derived as `original − Σ payments`, floored at zero.
pub fn remaining_balance(details: &InHouseDetails, final_price: f64) -> f64 {
    let paid: f64 = details.payments.iter().map(|p| p.amount).sum();
    round2((original_balance(details, final_price) - paid).max(0.0))
}

/// Current ledger state. `isBalancePaid` is monotonic, so a flagged record is
/// Settled regardless of what the derivation says.
pub fn ledger_state(details: &InHouseDetails, final_price: f64) -> LedgerState {
    if details.is_balance_paid || remaining_balance(details, final_price) <= 0.0 {
        LedgerState::Settled
    } else {
        LedgerState::Open
    }
}

/// Payment history ordered by the distinguishing timestamp. Concurrent
/// appends can land in storage out of order, so insertion order is not
/// trusted for display or reconciliation.
pub fn sorted_payments(details: &InHouseDetails) -> Vec<PaymentRecord> {
    let mut payments = details.payments.clone();
    payments.sort_by_key(|p| p.timestamp);
    payments
}

/// Result of one accepted payment.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub sale_id: String,
    pub payment: PaymentRecord,
    pub remaining_balance: f64,
    pub settled: bool,
}

/// Record a partial payment against an in-house sale.
///
/// The read, validation, and write all run inside one `BEGIN IMMEDIATE`
/// transaction so two operators paying the same ledger cannot both apply
/// against the same stale balance; the loser of the race surfaces a conflict.
pub fn record_payment(
    db: &DbState,
    sale_id: &str,
    amount: f64,
    source: PaymentSource,
) -> EngineResult<PaymentOutcome> {
    let conn = db.lock()?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = apply_payment(&conn, sale_id, amount, source);

    match result {
        Ok(outcome) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| EngineError::store(format!("commit: {e}")))?;
            info!(
                sale_id = %outcome.sale_id,
                amount = outcome.payment.amount,
                remaining = outcome.remaining_balance,
                settled = outcome.settled,
                "Installment payment recorded"
            );
            Ok(outcome)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn apply_payment(
    conn: &Connection,
    sale_id: &str,
    amount: f64,
    source: PaymentSource,
) -> EngineResult<PaymentOutcome> {
    let mut sale: StoredSale = sales::get_sale_with_conn(conn, sale_id)?;

    let final_price = sale.record.final_price;
    let details = sale
        .record
        .in_house_installment
        .as_mut()
        .ok_or_else(|| {
            EngineError::validation(format!("sale {sale_id} is not an in-house installment"))
        })?;

    if details.is_balance_paid {
        return Err(EngineError::conflict(format!(
            "sale {sale_id} balance already settled"
        )));
    }

    let remaining = remaining_balance(details, final_price);
    if remaining <= 0.0 {
        return Err(EngineError::conflict(format!(
            "sale {sale_id} balance already settled"
        )));
    }

    if amount <= 0.0 {
        return Err(EngineError::validation(format!(
            "payment amount must be positive, got {amount}"
        )));
    }
    if amount > remaining + MONEY_EPSILON {
        return Err(EngineError::validation(format!(
            "payment {amount} exceeds remaining balance {remaining}"
        )));
    }

    let now = Utc::now();
    // Strictly increasing across this ledger so two identical-looking
    // payments are never merged by the store's array-union semantics.
    let last_ts = details.payments.iter().map(|p| p.timestamp).max().unwrap_or(0);
    let timestamp = now.timestamp_millis().max(last_ts + 1);

    let remaining_after = round2((remaining - amount).max(0.0));
    let settled = remaining_after <= 0.0;

    let payment = PaymentRecord {
        date: now.format("%Y-%m-%d").to_string(),
        amount,
        remaining_after,
        source,
        timestamp,
    };

    details.payments.push(payment.clone());
    details.remaining_balance = Some(remaining_after);
    if settled {
        details.is_balance_paid = true;
    }

    sales::persist_sale_update(
        conn,
        &sale,
        &format!("sale:{sale_id}:payment:{timestamp}"),
    )?;

    Ok(PaymentOutcome {
        sale_id: sale_id.to_string(),
        payment,
        remaining_balance: remaining_after,
        settled,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::models::{AccountDetails, ItemCategory};
    use crate::sales::{create_sale, get_sale, NewSaleInput, PaymentInput};
    use rusqlite::params;

    /// price 10,000, discount 1,000, downpayment 2,000, 10% over 7 months:
    /// original balance 7,700, monthly 1,100.
    fn in_house_sale(db: &crate::db::DbState) -> String {
        let input = NewSaleInput {
            category: ItemCategory::Device,
            date: "2026-08-06".into(),
            user: Some("ana".into()),
            user_location: Some("Main Branch".into()),
            device_id: "SM-A155".into(),
            price: 10_000.0,
            discount_amount: Some(1_000.0),
            discount_percent: None,
            payment: PaymentInput::InHouse {
                customer_name: "R. Cruz".into(),
                downpayment_amount: 2_000.0,
                downpayment_source: PaymentSource::Cash,
                account_details: AccountDetails::default(),
                interest_percent: 10.0,
                months_to_pay: 7,
            },
        };
        create_sale(db, &input).expect("create in-house sale").sale.id
    }

    #[test]
    fn test_payment_sequence_to_settlement() {
        let db = test_db();
        let id = in_house_sale(&db);

        let first = record_payment(&db, &id, 3_000.0, PaymentSource::Cash).expect("first payment");
        assert_eq!(first.payment.remaining_after, 4_700.0);
        assert!(!first.settled);

        let second =
            record_payment(&db, &id, 4_700.0, PaymentSource::Gcash).expect("second payment");
        assert_eq!(second.payment.remaining_after, 0.0);
        assert!(second.settled);

        // Terminal: even 1 peso more is rejected.
        let third = record_payment(&db, &id, 1.0, PaymentSource::Cash);
        assert!(matches!(third, Err(EngineError::Conflict(_))));

        let sale = get_sale(&db, &id).unwrap();
        let details = sale.record.in_house_installment.as_ref().unwrap();
        assert!(details.is_balance_paid);
        assert_eq!(details.remaining_balance, Some(0.0));
        assert_eq!(details.payments.len(), 2);
    }

    #[test]
    fn test_rejects_out_of_range_amounts() {
        let db = test_db();
        let id = in_house_sale(&db);

        assert!(matches!(
            record_payment(&db, &id, 0.0, PaymentSource::Cash),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            record_payment(&db, &id, -50.0, PaymentSource::Cash),
            Err(EngineError::Validation(_))
        ));
        // 7,700 remaining; more than remaining + 0.01 is rejected
        assert!(matches!(
            record_payment(&db, &id, 7_700.02, PaymentSource::Cash),
            Err(EngineError::Validation(_))
        ));

        // Nothing was persisted by the rejected attempts
        let sale = get_sale(&db, &id).unwrap();
        assert!(sale.record.in_house_installment.unwrap().payments.is_empty());
    }

    #[test]
    fn test_epsilon_tolerance_settles() {
        let db = test_db();
        let id = in_house_sale(&db);

        // Overpayment within the 0.01 tolerance settles at exactly zero.
        let outcome =
            record_payment(&db, &id, 7_700.01, PaymentSource::Cash).expect("tolerated overpay");
        assert_eq!(outcome.remaining_balance, 0.0);
        assert!(outcome.settled);
    }

    #[test]
    fn test_payment_timestamps_strictly_increase() {
        let db = test_db();
        let id = in_house_sale(&db);

        record_payment(&db, &id, 100.0, PaymentSource::Cash).unwrap();
        record_payment(&db, &id, 100.0, PaymentSource::Cash).unwrap();
        record_payment(&db, &id, 100.0, PaymentSource::Cash).unwrap();

        let sale = get_sale(&db, &id).unwrap();
        let details = sale.record.in_house_installment.unwrap();
        let ts: Vec<i64> = details.payments.iter().map(|p| p.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]), "timestamps not strictly increasing: {ts:?}");
    }

    #[test]
    fn test_sorted_payments_orders_by_timestamp() {
        let details = InHouseDetails {
            customer_name: String::new(),
            downpayment_amount: 0.0,
            downpayment_source: PaymentSource::Cash,
            account_details: AccountDetails::default(),
            interest_percent: 0.0,
            interest_amount: None,
            months_to_pay: 0,
            monthly_amount: 0.0,
            balance: 0.0,
            total_amount_due: Some(900.0),
            is_balance_paid: false,
            remaining_balance: None,
            payments: vec![
                PaymentRecord {
                    date: "2026-08-02".into(),
                    amount: 200.0,
                    remaining_after: 400.0,
                    source: PaymentSource::Cash,
                    timestamp: 2_000,
                },
                PaymentRecord {
                    date: "2026-08-01".into(),
                    amount: 300.0,
                    remaining_after: 600.0,
                    source: PaymentSource::Gcash,
                    timestamp: 1_000,
                },
            ],
        };

        let sorted = sorted_payments(&details);
        assert_eq!(sorted[0].timestamp, 1_000);
        assert_eq!(sorted[1].timestamp, 2_000);

        // Derivation ignores insertion order too
        assert_eq!(remaining_balance(&details, 900.0), 400.0);
    }

    #[test]
    fn test_legacy_record_fallback_chain() {
        let db = test_db();

        // Record written before the interest fields existed: no totalAmountDue,
        // no interestAmount, no remainingBalance.
        let legacy = serde_json::json!({
            "date": "2026-07-01",
            "month": "July",
            "year": 2026,
            "dateSold": "July 1, 2026",
            "time": "10:00 AM",
            "timestamp": 1_782_900_000_000_i64,
            "sortOrder": 0,
            "user": "ana",
            "userLocation": "Main Branch",
            "deviceId": "OPPO-A18",
            "price": 10_000.0,
            "discountAmount": 1_000.0,
            "discountPercent": 10.0,
            "finalPrice": 9_000.0,
            "transactionType": "inHouseInstallment",
            "status": "completed",
            "inHouseInstallment": {
                "customerName": "L. Reyes",
                "downpaymentAmount": 2_000.0,
                "downpaymentSource": "cash",
                "interestPercent": 10.0,
                "monthsToPay": 7,
                "monthlyAmount": 1_100.0,
                "isBalancePaid": false,
                "payments": [],
            },
        });
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO sales (id, category, sale_date, status, transaction_type, timestamp,
                                    balance_unpaid, sort_order, record_json, created_at, updated_at)
                 VALUES ('legacy-1', 'device', '2026-07-01', 'completed', 'inHouseInstallment',
                         1782900000000, 1, 0, ?1, datetime('now'), datetime('now'))",
                params![legacy.to_string()],
            )
            .unwrap();
        }

        // Derived original balance: (9,000 - 2,000) + 10% = 7,700
        let sale = get_sale(&db, "legacy-1").unwrap();
        let details = sale.record.in_house_installment.as_ref().unwrap();
        assert_eq!(original_balance(details, sale.record.final_price), 7_700.0);
        assert_eq!(
            ledger_state(details, sale.record.final_price),
            LedgerState::Open
        );

        // Payments apply against the derived balance
        let outcome = record_payment(&db, "legacy-1", 7_000.0, PaymentSource::Cash).unwrap();
        assert_eq!(outcome.remaining_balance, 700.0);
    }

    #[test]
    fn test_original_balance_last_resort_is_final_price() {
        let details = InHouseDetails {
            customer_name: String::new(),
            downpayment_amount: 0.0,
            downpayment_source: PaymentSource::Cash,
            account_details: AccountDetails::default(),
            interest_percent: 0.0,
            interest_amount: None,
            months_to_pay: 0,
            monthly_amount: 0.0,
            balance: 0.0,
            total_amount_due: None,
            is_balance_paid: false,
            remaining_balance: None,
            payments: Vec::new(),
        };
        assert_eq!(original_balance(&details, 5_500.0), 5_500.0);
    }

    #[test]
    fn test_rejects_non_in_house_sale() {
        let db = test_db();
        let input = NewSaleInput {
            category: ItemCategory::Device,
            date: "2026-08-06".into(),
            user: Some("ana".into()),
            user_location: Some("Main Branch".into()),
            device_id: "SM-A155".into(),
            price: 500.0,
            discount_amount: None,
            discount_percent: None,
            payment: PaymentInput::Cash {
                payment_source: PaymentSource::Cash,
                account_details: AccountDetails::default(),
            },
        };
        let id = create_sale(&db, &input).unwrap().sale.id;

        assert!(matches!(
            record_payment(&db, &id, 100.0, PaymentSource::Cash),
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            record_payment(&db, "missing", 100.0, PaymentSource::Cash),
            Err(EngineError::NotFound(_))
        ));
    }
}
