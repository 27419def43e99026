//! Daily reconciliation engine.
//!
//! Aggregates one calendar date's completed transactions (device sales,
//! accessory sales, and service-ledger entries) into sales, cash-flow, and
//! ledger summaries, and persists one snapshot per date in
//! `daily_summaries`. Re-saving a date overwrites the prior snapshot in
//! full, so the save path demands explicit confirmation when a snapshot
//! already exists.
//!
//! Aggregation is deterministic: unchanged input produces byte-identical
//! output. `generatedAt` is stamped at save time, never at aggregate time.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, DbState};
use crate::error::{EngineError, EngineResult};
use crate::installments;
use crate::models::{
    display_date, parse_wire_date, ItemCategory, PaymentDetails, PaymentSource, SaleStatus,
    ServiceCategory, ServiceEntryType, StoredSale, StoredServiceEntry,
};
use crate::pricing::round2;
use crate::sales;
use crate::services;

// ---------------------------------------------------------------------------
// Summary shapes (wire contract)
// ---------------------------------------------------------------------------

/// Count + amount for a single transaction method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodTally {
    pub count: u32,
    pub amount: f64,
}

/// Count + amount + money split for an installment method. For in-house
/// sales `balance` is the total amount due, interest included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentTally {
    pub count: u32,
    pub amount: f64,
    pub downpayment: f64,
    pub balance: f64,
}

/// Per-category sales summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub total_count: u32,
    pub total_amount: f64,
    pub cash: MethodTally,
    pub home_credit: InstallmentTally,
    pub skyro: InstallmentTally,
    pub in_house: InstallmentTally,
}

/// The six payment-source buckets money flows through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBuckets {
    pub cash: f64,
    pub gcash: f64,
    pub paymaya: f64,
    pub bank_transfer: f64,
    pub credit_card: f64,
    pub others: f64,
}

impl SourceBuckets {
    fn add(&mut self, source: PaymentSource, amount: f64) {
        match source {
            PaymentSource::Cash => self.cash += amount,
            PaymentSource::Gcash => self.gcash += amount,
            PaymentSource::Paymaya => self.paymaya += amount,
            PaymentSource::BankTransfer => self.bank_transfer += amount,
            PaymentSource::CreditCard => self.credit_card += amount,
            PaymentSource::Others => self.others += amount,
        }
    }

    fn round(&mut self) {
        self.cash = round2(self.cash);
        self.gcash = round2(self.gcash);
        self.paymaya = round2(self.paymaya);
        self.bank_transfer = round2(self.bank_transfer);
        self.credit_card = round2(self.credit_card);
        self.others = round2(self.others);
    }

    pub fn total(&self) -> f64 {
        round2(
            self.cash + self.gcash + self.paymaya + self.bank_transfer + self.credit_card
                + self.others,
        )
    }
}

/// Receivables created by the day's installment sales, per method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivableTotals {
    pub home_credit: f64,
    pub skyro: f64,
    pub in_house: f64,
    pub total: f64,
}

/// Per-category cash flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowSummary {
    pub inflow: SourceBuckets,
    pub total_inflow: f64,
    pub receivables: ReceivableTotals,
    pub brand_zero_subsidy: f64,
}

/// Source buckets available on the service ledger (no bank transfer or
/// credit card over the service counter).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBuckets {
    pub cash: f64,
    pub gcash: f64,
    pub paymaya: f64,
    pub others: f64,
}

impl ServiceBuckets {
    fn add(&mut self, source: PaymentSource, amount: f64) {
        match source {
            PaymentSource::Cash => self.cash += amount,
            PaymentSource::Gcash => self.gcash += amount,
            PaymentSource::Paymaya => self.paymaya += amount,
            // Guarded at entry time; anything else folds into others.
            _ => self.others += amount,
        }
    }

    fn round(&mut self) {
        self.cash = round2(self.cash);
        self.gcash = round2(self.gcash);
        self.paymaya = round2(self.paymaya);
        self.others = round2(self.others);
    }

    pub fn total(&self) -> f64 {
        round2(self.cash + self.gcash + self.paymaya + self.others)
    }
}

/// Service-ledger cash flow: credit entries in, debit entries out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCashFlowSummary {
    pub inflow: ServiceBuckets,
    pub outflow: ServiceBuckets,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub net: f64,
}

/// Service-side sales view: credit entries only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSalesSummary {
    pub count: u32,
    pub amount: f64,
}

/// Cross-cutting ledger view: per bucket, device + accessory inflow plus the
/// net service flow. The receivables figure nets Home Credit / Skyro
/// balances against their Brand-Zero subsidy (the subsidy is absorbed by the
/// partner, not truly receivable) and adds in-house balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummaryData {
    pub cash: f64,
    pub gcash: f64,
    pub paymaya: f64,
    pub bank_transfer: f64,
    pub credit_card: f64,
    pub others: f64,
    pub total_inflow: f64,
    pub receivables: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCounts {
    pub devices: u32,
    pub accessories: u32,
    pub services: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIds {
    pub devices: Vec<String>,
    pub accessories: Vec<String>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummarySection {
    pub devices: SalesSummary,
    pub accessories: SalesSummary,
    pub services: ServiceSalesSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowSection {
    pub devices: CashFlowSummary,
    pub accessories: CashFlowSummary,
    pub services: ServiceCashFlowSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandTotals {
    pub total_product_sales: f64,
    pub total_revenue: f64,
    pub total_receivables_created: f64,
    pub total_cash_inflow: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBreakdown {
    pub device_sales: f64,
    pub accessory_sales: f64,
    pub service_fees: f64,
    pub misc_income: f64,
}

/// One date's reconciliation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: String,
    pub display_date: String,
    pub generated_at: String,
    pub generated_by: String,
    pub transaction_counts: TransactionCounts,
    pub transaction_ids: TransactionIds,
    pub sales_summary: SalesSummarySection,
    pub cash_flow_summary: CashFlowSection,
    pub ledger_summary: LedgerSummaryData,
    pub grand_totals: GrandTotals,
    pub revenue_breakdown: RevenueBreakdown,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Per-category sales summary, partitioned by transaction method.
fn sales_summary(sales: &[StoredSale]) -> EngineResult<SalesSummary> {
    let mut summary = SalesSummary::default();

    for sale in sales {
        let record = &sale.record;
        summary.total_count += 1;
        summary.total_amount += record.final_price;

        match record.payment_details()? {
            PaymentDetails::Cash(d) => {
                summary.cash.count += 1;
                summary.cash.amount += d.amount_paid;
            }
            PaymentDetails::HomeCredit(d) => {
                summary.home_credit.count += 1;
                summary.home_credit.amount += record.final_price;
                summary.home_credit.downpayment += d.downpayment_amount;
                summary.home_credit.balance += d.balance;
            }
            PaymentDetails::Skyro(d) => {
                summary.skyro.count += 1;
                summary.skyro.amount += record.final_price;
                summary.skyro.downpayment += d.downpayment_amount;
                summary.skyro.balance += d.balance;
            }
            PaymentDetails::InHouse(d) => {
                summary.in_house.count += 1;
                summary.in_house.amount += record.final_price;
                summary.in_house.downpayment += d.downpayment_amount;
                // Interest included: the total amount due, not the principal
                summary.in_house.balance +=
                    installments::original_balance(d, record.final_price);
            }
        }
    }

    summary.total_amount = round2(summary.total_amount);
    for tally in [
        &mut summary.home_credit,
        &mut summary.skyro,
        &mut summary.in_house,
    ] {
        tally.amount = round2(tally.amount);
        tally.downpayment = round2(tally.downpayment);
        tally.balance = round2(tally.balance);
    }
    summary.cash.amount = round2(summary.cash.amount);
    Ok(summary)
}

/// Per-category cash flow: method inflows routed into source buckets, plus
/// the receivables the day's installment sales created.
fn cash_flow_summary(sales: &[StoredSale]) -> EngineResult<CashFlowSummary> {
    let mut flow = CashFlowSummary::default();

    for sale in sales {
        let record = &sale.record;
        match record.payment_details()? {
            PaymentDetails::Cash(d) => {
                flow.inflow.add(d.payment_source, d.amount_paid);
            }
            PaymentDetails::HomeCredit(d) => {
                flow.inflow.add(d.downpayment_source, d.downpayment_amount);
                flow.receivables.home_credit += d.balance;
                flow.brand_zero_subsidy += d.brand_zero_subsidy;
            }
            PaymentDetails::Skyro(d) => {
                flow.inflow.add(d.downpayment_source, d.downpayment_amount);
                flow.receivables.skyro += d.balance;
                flow.brand_zero_subsidy += d.brand_zero_subsidy;
            }
            PaymentDetails::InHouse(d) => {
                flow.inflow.add(d.downpayment_source, d.downpayment_amount);
                flow.receivables.in_house +=
                    installments::original_balance(d, record.final_price);
            }
        }
    }

    flow.inflow.round();
    flow.total_inflow = flow.inflow.total();
    flow.receivables.home_credit = round2(flow.receivables.home_credit);
    flow.receivables.skyro = round2(flow.receivables.skyro);
    flow.receivables.in_house = round2(flow.receivables.in_house);
    flow.receivables.total = round2(
        flow.receivables.home_credit + flow.receivables.skyro + flow.receivables.in_house,
    );
    flow.brand_zero_subsidy = round2(flow.brand_zero_subsidy);
    Ok(flow)
}

/// Service-ledger cash flow: credits in, debits out.
fn service_cash_flow(entries: &[StoredServiceEntry]) -> ServiceCashFlowSummary {
    let mut flow = ServiceCashFlowSummary::default();

    for stored in entries {
        let entry = &stored.entry;
        match entry.entry_type {
            ServiceEntryType::Credit => flow.inflow.add(entry.payment_source, entry.amount),
            ServiceEntryType::Debit => flow.outflow.add(entry.payment_source, entry.amount),
        }
    }

    flow.inflow.round();
    flow.outflow.round();
    flow.total_inflow = flow.inflow.total();
    flow.total_outflow = flow.outflow.total();
    flow.net = round2(flow.total_inflow - flow.total_outflow);
    flow
}

fn service_sales_summary(entries: &[StoredServiceEntry]) -> ServiceSalesSummary {
    let mut summary = ServiceSalesSummary::default();
    for stored in entries {
        if stored.entry.entry_type == ServiceEntryType::Credit {
            summary.count += 1;
            summary.amount += stored.entry.amount;
        }
    }
    summary.amount = round2(summary.amount);
    summary
}

/// Cross-cutting ledger view over both categories and the service net.
fn ledger_summary(
    devices: &CashFlowSummary,
    accessories: &CashFlowSummary,
    service: &ServiceCashFlowSummary,
) -> LedgerSummaryData {
    let partner_receivables = devices.receivables.home_credit
        + devices.receivables.skyro
        + accessories.receivables.home_credit
        + accessories.receivables.skyro;
    let subsidy = devices.brand_zero_subsidy + accessories.brand_zero_subsidy;
    let in_house = devices.receivables.in_house + accessories.receivables.in_house;

    let mut ledger = LedgerSummaryData {
        cash: devices.inflow.cash
            + accessories.inflow.cash
            + (service.inflow.cash - service.outflow.cash),
        gcash: devices.inflow.gcash
            + accessories.inflow.gcash
            + (service.inflow.gcash - service.outflow.gcash),
        paymaya: devices.inflow.paymaya
            + accessories.inflow.paymaya
            + (service.inflow.paymaya - service.outflow.paymaya),
        bank_transfer: devices.inflow.bank_transfer + accessories.inflow.bank_transfer,
        credit_card: devices.inflow.credit_card + accessories.inflow.credit_card,
        others: devices.inflow.others
            + accessories.inflow.others
            + (service.inflow.others - service.outflow.others),
        total_inflow: 0.0,
        receivables: round2((partner_receivables - subsidy).max(0.0) + in_house),
    };
    ledger.cash = round2(ledger.cash);
    ledger.gcash = round2(ledger.gcash);
    ledger.paymaya = round2(ledger.paymaya);
    ledger.bank_transfer = round2(ledger.bank_transfer);
    ledger.credit_card = round2(ledger.credit_card);
    ledger.others = round2(ledger.others);
    ledger.total_inflow = round2(
        ledger.cash
            + ledger.gcash
            + ledger.paymaya
            + ledger.bank_transfer
            + ledger.credit_card
            + ledger.others,
    );
    ledger
}

/// Aggregate one date's completed transactions into a reconciliation
/// snapshot.
///
/// Any read failure aborts the whole report; nothing is persisted here.
/// `generatedAt` is left empty so unchanged input always produces
/// byte-identical output; `save_daily_summary` stamps it.
pub fn aggregate_day(db: &DbState, date: &str, generated_by: &str) -> EngineResult<DailySummary> {
    let day = parse_wire_date(date)?;
    let conn = db.lock()?;

    let wrap = |e: EngineError| EngineError::aggregation(e.to_string());

    let devices =
        sales::list_sales_with_conn(&conn, ItemCategory::Device, date, SaleStatus::Completed)
            .map_err(wrap)?;
    let accessories =
        sales::list_sales_with_conn(&conn, ItemCategory::Accessory, date, SaleStatus::Completed)
            .map_err(wrap)?;
    let service_entries =
        services::list_service_entries_with_conn(&conn, date, SaleStatus::Completed)
            .map_err(wrap)?;
    drop(conn);

    let device_sales = sales_summary(&devices).map_err(wrap)?;
    let accessory_sales = sales_summary(&accessories).map_err(wrap)?;
    let device_flow = cash_flow_summary(&devices).map_err(wrap)?;
    let accessory_flow = cash_flow_summary(&accessories).map_err(wrap)?;
    let service_flow = service_cash_flow(&service_entries);
    let service_sales = service_sales_summary(&service_entries);
    let ledger = ledger_summary(&device_flow, &accessory_flow, &service_flow);

    let mut service_fees = 0.0;
    let mut misc_income = 0.0;
    for stored in &service_entries {
        if stored.entry.entry_type == ServiceEntryType::Credit {
            match stored.entry.category {
                ServiceCategory::Service => service_fees += stored.entry.amount,
                ServiceCategory::Misc => misc_income += stored.entry.amount,
            }
        }
    }
    service_fees = round2(service_fees);
    misc_income = round2(misc_income);

    let device_sales_amount = device_sales.total_amount;
    let accessory_sales_amount = accessory_sales.total_amount;
    let total_product_sales = round2(device_sales_amount + accessory_sales_amount);
    let total_receivables_created =
        round2(device_flow.receivables.total + accessory_flow.receivables.total);
    let total_cash_inflow = round2(
        device_flow.total_inflow + accessory_flow.total_inflow + service_flow.net,
    );

    let summary = DailySummary {
        date: date.to_string(),
        display_date: display_date(day),
        generated_at: String::new(),
        generated_by: generated_by.to_string(),
        transaction_counts: TransactionCounts {
            devices: devices.len() as u32,
            accessories: accessories.len() as u32,
            services: service_entries.len() as u32,
            total: (devices.len() + accessories.len() + service_entries.len()) as u32,
        },
        transaction_ids: TransactionIds {
            devices: devices.iter().map(|s| s.id.clone()).collect(),
            accessories: accessories.iter().map(|s| s.id.clone()).collect(),
            services: service_entries.iter().map(|s| s.id.clone()).collect(),
        },
        sales_summary: SalesSummarySection {
            devices: device_sales,
            accessories: accessory_sales,
            services: service_sales,
        },
        cash_flow_summary: CashFlowSection {
            devices: device_flow,
            accessories: accessory_flow,
            services: service_flow,
        },
        ledger_summary: ledger,
        grand_totals: GrandTotals {
            total_product_sales,
            total_revenue: round2(total_product_sales + service_fees + misc_income),
            total_receivables_created,
            total_cash_inflow,
        },
        revenue_breakdown: RevenueBreakdown {
            device_sales: device_sales_amount,
            accessory_sales: accessory_sales_amount,
            service_fees,
            misc_income,
        },
    };

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Save a reconciliation snapshot, overwriting any prior snapshot for the
/// same date in full.
///
/// Overwriting is destructive to a manually edited snapshot, so an existing
/// row demands `confirm_overwrite`. Returns the stamped summary as saved.
pub fn save_daily_summary(
    db: &DbState,
    summary: &DailySummary,
    confirm_overwrite: bool,
) -> EngineResult<DailySummary> {
    let conn = db.lock()?;

    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM daily_summaries WHERE report_date = ?1",
            params![summary.date],
            |_| Ok(()),
        )
        .map(|_| true)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            other => Err(EngineError::store(format!("check existing report: {other}"))),
        })?;

    if exists && !confirm_overwrite {
        return Err(EngineError::conflict(format!(
            "a report for {} already exists; overwriting must be confirmed",
            summary.date
        )));
    }

    let mut stamped = summary.clone();
    stamped.generated_at = Utc::now().to_rfc3339();

    let report_json = serde_json::to_value(&stamped)?;
    let now_str = stamped.generated_at.clone();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| EngineError::conflict(format!("begin transaction: {e}")))?;

    let result = (|| -> EngineResult<()> {
        conn.execute(
            "INSERT INTO daily_summaries (
                report_date, display_date, generated_at, generated_by,
                transaction_count, total_product_sales, total_revenue, total_receivables,
                report_json, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(report_date) DO UPDATE SET
                display_date = excluded.display_date,
                generated_at = excluded.generated_at,
                generated_by = excluded.generated_by,
                transaction_count = excluded.transaction_count,
                total_product_sales = excluded.total_product_sales,
                total_revenue = excluded.total_revenue,
                total_receivables = excluded.total_receivables,
                report_json = excluded.report_json,
                updated_at = excluded.updated_at",
            params![
                stamped.date,
                stamped.display_date,
                stamped.generated_at,
                stamped.generated_by,
                stamped.transaction_counts.total,
                stamped.grand_totals.total_product_sales,
                stamped.grand_totals.total_revenue,
                stamped.grand_totals.total_receivables_created,
                report_json.to_string(),
                now_str,
            ],
        )
        .map_err(|e| EngineError::store(format!("save report: {e}")))?;

        db::enqueue_sync(
            &conn,
            "daily_summary",
            &stamped.date,
            if exists { "update" } else { "insert" },
            &report_json,
            &format!("daily-summary:{}:{}", stamped.date, stamped.generated_at),
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
        date = %stamped.date,
        transactions = stamped.transaction_counts.total,
        total_revenue = stamped.grand_totals.total_revenue,
        overwrote = exists,
        "Daily report saved"
    );

    Ok(stamped)
}

/// Load the saved snapshot for a date.
pub fn get_daily_summary(db: &DbState, date: &str) -> EngineResult<DailySummary> {
    let conn = db.lock()?;
    let report_json: String = conn
        .query_row(
            "SELECT report_json FROM daily_summaries WHERE report_date = ?1",
            params![date],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                EngineError::not_found(format!("report for {date}"))
            }
            other => EngineError::store(format!("load report: {other}")),
        })?;
    Ok(serde_json::from_str(&report_json)?)
}

/// List saved snapshots in a date range, newest first.
pub fn list_daily_summaries(
    db: &DbState,
    start_date: &str,
    end_date: &str,
) -> EngineResult<Vec<DailySummary>> {
    let conn = db.lock()?;
    let mut stmt = conn
        .prepare(
            "SELECT report_json FROM daily_summaries
             WHERE report_date BETWEEN ?1 AND ?2
             ORDER BY report_date DESC",
        )
        .map_err(|e| EngineError::store(format!("prepare report query: {e}")))?;

    let rows = stmt
        .query_map(params![start_date, end_date], |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| EngineError::store(format!("query reports: {e}")))?;

    let mut summaries = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| EngineError::store(format!("read report row: {e}")))?;
        summaries.push(serde_json::from_str(&raw)?);
    }
    Ok(summaries)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::installments;
    use crate::models::{AccountDetails, ServiceEntry, ServiceEntryType};
    use crate::sales::{create_sale, NewSaleInput, PartnerFinancedInput, PaymentInput};
    use crate::services::{record_service_entry, NewServiceEntry};

    const DAY: &str = "2026-08-06";

    fn sale(
        db: &DbState,
        category: ItemCategory,
        price: f64,
        discount: f64,
        payment: PaymentInput,
    ) -> String {
        let input = NewSaleInput {
            category,
            date: DAY.into(),
            user: Some("ana".into()),
            user_location: Some("Main Branch".into()),
            device_id: "SM-A155".into(),
            price,
            discount_amount: Some(discount),
            discount_percent: None,
            payment,
        };
        create_sale(db, &input).expect("create sale").sale.id
    }

    fn cash_payment(source: PaymentSource) -> PaymentInput {
        PaymentInput::Cash {
            payment_source: source,
            account_details: AccountDetails::default(),
        }
    }

    fn service(
        db: &DbState,
        entry_type: ServiceEntryType,
        category: ServiceCategory,
        amount: f64,
    ) -> String {
        record_service_entry(
            db,
            &NewServiceEntry {
                date: DAY.into(),
                description: "ledger entry".into(),
                entry_type,
                category,
                amount,
                payment_source: PaymentSource::Cash,
                recorded_by: Some("ana".into()),
            },
        )
        .expect("record service entry")
        .id
    }

    #[test]
    fn test_ledger_cash_bucket_nets_service_flow() {
        let db = test_db();
        sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));
        sale(&db, ItemCategory::Accessory, 1_200.0, 0.0, cash_payment(PaymentSource::Cash));
        service(&db, ServiceEntryType::Credit, ServiceCategory::Service, 800.0);
        service(&db, ServiceEntryType::Debit, ServiceCategory::Service, 300.0);

        let summary = aggregate_day(&db, DAY, "ana").expect("aggregate_day");
        // 5,000 + 1,200 + (800 - 300)
        assert_eq!(summary.ledger_summary.cash, 6_700.0);
        assert_eq!(summary.cash_flow_summary.services.net, 500.0);
    }

    #[test]
    fn test_aggregate_full_day() {
        let db = test_db();
        let d1 = sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));
        let d2 = sale(
            &db,
            ItemCategory::Device,
            10_000.0,
            0.0,
            PaymentInput::HomeCredit(PartnerFinancedInput {
                downpayment_amount: 2_000.0,
                downpayment_source: PaymentSource::Gcash,
                account_details: AccountDetails::default(),
                brand_zero: true,
                subsidy_percent: 5.0,
            }),
        );
        let a1 = sale(
            &db,
            ItemCategory::Accessory,
            10_000.0,
            1_000.0,
            PaymentInput::InHouse {
                customer_name: "R. Cruz".into(),
                downpayment_amount: 2_000.0,
                downpayment_source: PaymentSource::Cash,
                account_details: AccountDetails::default(),
                interest_percent: 10.0,
                months_to_pay: 7,
            },
        );
        service(&db, ServiceEntryType::Credit, ServiceCategory::Service, 800.0);
        service(&db, ServiceEntryType::Credit, ServiceCategory::Misc, 200.0);
        service(&db, ServiceEntryType::Debit, ServiceCategory::Service, 300.0);

        let summary = aggregate_day(&db, DAY, "ana").expect("aggregate_day");

        assert_eq!(summary.display_date, "August 6, 2026");
        assert_eq!(summary.generated_at, "");
        assert_eq!(summary.transaction_counts.devices, 2);
        assert_eq!(summary.transaction_counts.accessories, 1);
        assert_eq!(summary.transaction_counts.services, 3);
        assert_eq!(summary.transaction_counts.total, 6);
        assert_eq!(summary.transaction_ids.devices, vec![d1, d2]);
        assert_eq!(summary.transaction_ids.accessories, vec![a1]);

        // Sales summary
        let devices = &summary.sales_summary.devices;
        assert_eq!(devices.total_amount, 15_000.0);
        assert_eq!(devices.cash.count, 1);
        assert_eq!(devices.cash.amount, 5_000.0);
        assert_eq!(devices.home_credit.count, 1);
        assert_eq!(devices.home_credit.downpayment, 2_000.0);
        assert_eq!(devices.home_credit.balance, 8_000.0);
        let accessories = &summary.sales_summary.accessories;
        assert_eq!(accessories.in_house.count, 1);
        // Total amount due includes interest: (9,000 - 2,000) * 1.10
        assert_eq!(accessories.in_house.balance, 7_700.0);
        assert_eq!(summary.sales_summary.services.count, 2);
        assert_eq!(summary.sales_summary.services.amount, 1_000.0);

        // Cash flow
        let device_flow = &summary.cash_flow_summary.devices;
        assert_eq!(device_flow.inflow.cash, 5_000.0);
        assert_eq!(device_flow.inflow.gcash, 2_000.0);
        assert_eq!(device_flow.total_inflow, 7_000.0);
        assert_eq!(device_flow.receivables.home_credit, 8_000.0);
        assert_eq!(device_flow.brand_zero_subsidy, 400.0);
        let accessory_flow = &summary.cash_flow_summary.accessories;
        assert_eq!(accessory_flow.inflow.cash, 2_000.0);
        assert_eq!(accessory_flow.receivables.in_house, 7_700.0);

        // Ledger: receivables net the Brand-Zero subsidy
        assert_eq!(summary.ledger_summary.gcash, 2_000.0);
        assert_eq!(summary.ledger_summary.cash, 5_000.0 + 2_000.0 + 500.0);
        assert_eq!(summary.ledger_summary.receivables, 7_600.0 + 7_700.0);

        // Grand totals
        assert_eq!(summary.grand_totals.total_product_sales, 24_000.0);
        assert_eq!(summary.grand_totals.total_revenue, 25_000.0);
        assert_eq!(summary.grand_totals.total_receivables_created, 15_700.0);
        assert_eq!(summary.revenue_breakdown.device_sales, 15_000.0);
        assert_eq!(summary.revenue_breakdown.accessory_sales, 9_000.0);
        assert_eq!(summary.revenue_breakdown.service_fees, 800.0);
        assert_eq!(summary.revenue_breakdown.misc_income, 200.0);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let db = test_db();
        let ih = sale(
            &db,
            ItemCategory::Device,
            10_000.0,
            1_000.0,
            PaymentInput::InHouse {
                customer_name: "R. Cruz".into(),
                downpayment_amount: 2_000.0,
                downpayment_source: PaymentSource::Cash,
                account_details: AccountDetails::default(),
                interest_percent: 10.0,
                months_to_pay: 7,
            },
        );
        service(&db, ServiceEntryType::Credit, ServiceCategory::Service, 800.0);

        let first = aggregate_day(&db, DAY, "ana").unwrap();
        let second = aggregate_day(&db, DAY, "ana").unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap(),
            "unchanged input must produce byte-identical reports"
        );

        // Installment payments only touch tracking fields; the day's
        // creation-baked figures do not move.
        installments::record_payment(&db, &ih, 3_000.0, PaymentSource::Cash).unwrap();
        let third = aggregate_day(&db, DAY, "ana").unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&third).unwrap()
        );
    }

    #[test]
    fn test_save_overwrite_requires_confirmation() {
        let db = test_db();
        sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));

        let summary = aggregate_day(&db, DAY, "ana").unwrap();
        let saved = save_daily_summary(&db, &summary, false).expect("first save");
        assert!(!saved.generated_at.is_empty());

        // Unconfirmed re-save is rejected
        assert!(matches!(
            save_daily_summary(&db, &summary, false),
            Err(EngineError::Conflict(_))
        ));

        // Confirmed re-save overwrites in full, still one row
        sale(&db, ItemCategory::Device, 700.0, 0.0, cash_payment(PaymentSource::Cash));
        let second = aggregate_day(&db, DAY, "ana").unwrap();
        save_daily_summary(&db, &second, true).expect("confirmed overwrite");

        let loaded = get_daily_summary(&db, DAY).expect("load report");
        assert_eq!(loaded.transaction_counts.devices, 2);
        assert_eq!(loaded.grand_totals.total_product_sales, 5_700.0);

        let conn = db.conn.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_summaries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let ops: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT operation FROM sync_queue WHERE entity_type = 'daily_summary' ORDER BY id",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        assert_eq!(ops, vec!["insert".to_string(), "update".to_string()]);
    }

    #[test]
    fn test_report_wire_shape() {
        let db = test_db();
        sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));
        let summary = aggregate_day(&db, DAY, "ana").unwrap();
        let saved = save_daily_summary(&db, &summary, false).unwrap();

        let v = serde_json::to_value(&saved).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "date",
            "displayDate",
            "generatedAt",
            "generatedBy",
            "transactionCounts",
            "transactionIds",
            "salesSummary",
            "cashFlowSummary",
            "ledgerSummary",
            "grandTotals",
            "revenueBreakdown",
        ] {
            assert!(obj.contains_key(key), "missing wire field {key}");
        }
        assert_eq!(v["transactionCounts"]["devices"], 1);
        assert_eq!(v["salesSummary"]["devices"]["totalAmount"], 5_000.0);
        assert_eq!(v["cashFlowSummary"]["devices"]["inflow"]["cash"], 5_000.0);
        assert_eq!(v["grandTotals"]["totalProductSales"], 5_000.0);
    }

    #[test]
    fn test_read_failure_aborts_whole_report() {
        let db = test_db();
        sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch("DROP TABLE service_entries").unwrap();
        }

        let result = aggregate_day(&db, DAY, "ana");
        assert!(matches!(result, Err(EngineError::Aggregation(_))));

        // Nothing was persisted by the aborted run
        let conn = db.conn.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_summaries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_list_daily_summaries_range() {
        let db = test_db();
        sale(&db, ItemCategory::Device, 5_000.0, 0.0, cash_payment(PaymentSource::Cash));
        let summary = aggregate_day(&db, DAY, "ana").unwrap();
        save_daily_summary(&db, &summary, false).unwrap();

        let listed = list_daily_summaries(&db, "2026-08-01", "2026-08-31").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].date, DAY);

        let outside = list_daily_summaries(&db, "2026-07-01", "2026-07-31").unwrap();
        assert!(outside.is_empty());
    }

    #[test]
    fn test_service_entry_category_split_survives_wire() {
        // ServiceEntry round-trips with its category split intact.
        let entry = ServiceEntry {
            date: DAY.into(),
            description: "load wallet".into(),
            entry_type: ServiceEntryType::Credit,
            category: ServiceCategory::Misc,
            amount: 150.0,
            payment_source: PaymentSource::Gcash,
            status: SaleStatus::Completed,
            recorded_by: "ana".into(),
            timestamp: 1,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["entryType"], "credit");
        assert_eq!(v["category"], "misc");
    }
}
