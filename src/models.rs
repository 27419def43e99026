//! Wire-contract record types for GadgetPoint POS.
//!
//! Field names on these structs are the contract with the backing document
//! store and must round-trip byte-for-byte, hence the blanket
//! `rename_all = "camelCase"` and the explicit field ordering. The document
//! id is the storage key and is carried *outside* the record (see
//! [`StoredSale`]), never inside it.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Discriminants
// ---------------------------------------------------------------------------

/// Item category a sale belongs to. Each category is its own collection on
/// the remote store; locally it is an indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemCategory {
    Device,
    Accessory,
}

impl ItemCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemCategory::Device => "device",
            ItemCategory::Accessory => "accessory",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "device" => Ok(ItemCategory::Device),
            "accessory" => Ok(ItemCategory::Accessory),
            other => Err(EngineError::validation(format!(
                "unknown item category: {other}"
            ))),
        }
    }
}

/// Transaction method discriminant. Selects which payment-details object is
/// populated on the sale record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    Cash,
    HomeCredit,
    Skyro,
    InHouseInstallment,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Cash => "cash",
            TransactionType::HomeCredit => "homeCredit",
            TransactionType::Skyro => "skyro",
            TransactionType::InHouseInstallment => "inHouseInstallment",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "cash" => Ok(TransactionType::Cash),
            "homeCredit" => Ok(TransactionType::HomeCredit),
            "skyro" => Ok(TransactionType::Skyro),
            "inHouseInstallment" => Ok(TransactionType::InHouseInstallment),
            other => Err(EngineError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Payment-source channel. Sales route through all six buckets; service
/// entries only ever carry cash/gcash/paymaya/others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentSource {
    Cash,
    Gcash,
    Paymaya,
    BankTransfer,
    CreditCard,
    Others,
}

impl PaymentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentSource::Cash => "cash",
            PaymentSource::Gcash => "gcash",
            PaymentSource::Paymaya => "paymaya",
            PaymentSource::BankTransfer => "bankTransfer",
            PaymentSource::CreditCard => "creditCard",
            PaymentSource::Others => "others",
        }
    }
}

/// Sale record lifecycle status. Only `completed` sales participate in
/// receivables and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaleStatus {
    Completed,
    Voided,
}

impl SaleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SaleStatus::Completed => "completed",
            SaleStatus::Voided => "voided",
        }
    }
}

// ---------------------------------------------------------------------------
// Payment details
// ---------------------------------------------------------------------------

/// Bank/e-wallet account metadata attached to a payment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_type: String,
}

/// Full cash payment. No balance is ever owed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashDetails {
    pub amount_paid: f64,
    pub payment_source: PaymentSource,
    #[serde(default)]
    pub account_details: AccountDetails,
}

/// Partner-financed installment (Home Credit / Skyro): a down payment plus a
/// single lump unpaid balance carried by the financing partner.
///
/// `brand_zero_subsidy` reduces the net receivable in reporting but never the
/// stored `balance`. `is_balance_paid` transitions false -> true only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentDetails {
    pub downpayment_amount: f64,
    pub downpayment_source: PaymentSource,
    #[serde(default)]
    pub account_details: AccountDetails,
    pub balance: f64,
    pub is_balance_paid: bool,
    #[serde(default)]
    pub brand_zero: bool,
    #[serde(default)]
    pub brand_zero_subsidy: f64,
    #[serde(default)]
    pub subsidy_percent: f64,
}

/// One partial payment against an in-house installment.
///
/// `timestamp` is epoch millis and strictly increases across a ledger's
/// payments so two identical-looking payments are never merged by the store's
/// array-union semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub date: String,
    pub amount: f64,
    pub remaining_after: f64,
    pub source: PaymentSource,
    pub timestamp: i64,
}

/// Store-financed installment with interest and a multi-payment history.
///
/// `interest_amount`, `total_amount_due` and `remaining_balance` are optional
/// on deserialization: records written before the interest fields existed
/// lack them, and the original balance is re-derived through the fallback
/// chain in `installments::original_balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InHouseDetails {
    #[serde(default)]
    pub customer_name: String,
    pub downpayment_amount: f64,
    pub downpayment_source: PaymentSource,
    #[serde(default)]
    pub account_details: AccountDetails,
    #[serde(default)]
    pub interest_percent: f64,
    #[serde(default)]
    pub interest_amount: Option<f64>,
    #[serde(default)]
    pub months_to_pay: u32,
    #[serde(default)]
    pub monthly_amount: f64,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub total_amount_due: Option<f64>,
    pub is_balance_paid: bool,
    #[serde(default)]
    pub remaining_balance: Option<f64>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
}

/// Borrowed view over the exactly-one populated payment-details object,
/// selected by `transactionType`. Consumption sites match exhaustively.
#[derive(Debug)]
pub enum PaymentDetails<'a> {
    Cash(&'a CashDetails),
    HomeCredit(&'a InstallmentDetails),
    Skyro(&'a InstallmentDetails),
    InHouse(&'a InHouseDetails),
}

// ---------------------------------------------------------------------------
// Sale record
// ---------------------------------------------------------------------------

/// One completed transaction for a device or an accessory.
///
/// Every derived field (pricing, balances, display dates) is baked in at
/// checkout and never recomputed afterwards; the lone exception is the
/// in-house payment-tracking state, which the installment ledger maintains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub date: String,
    pub month: String,
    pub year: i32,
    pub date_sold: String,
    pub time: String,
    pub timestamp: i64,
    #[serde(default)]
    pub sort_order: i64,
    pub user: String,
    pub user_location: String,
    pub device_id: String,
    pub price: f64,
    pub discount_amount: f64,
    pub discount_percent: f64,
    pub final_price: f64,
    pub transaction_type: TransactionType,
    pub status: SaleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_payment: Option<CashDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_credit_payment: Option<InstallmentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skyro_payment: Option<InstallmentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_house_installment: Option<InHouseDetails>,
}

impl SaleRecord {
    /// Resolve the payment-details object named by `transaction_type`.
    ///
    /// A record whose discriminant points at a missing object is corrupt;
    /// that surfaces as a store error rather than a panic.
    pub fn payment_details(&self) -> EngineResult<PaymentDetails<'_>> {
        let missing =
            || EngineError::store(format!("sale record missing {} details", self.transaction_type.as_str()));
        match self.transaction_type {
            TransactionType::Cash => {
                self.cash_payment.as_ref().map(PaymentDetails::Cash).ok_or_else(missing)
            }
            TransactionType::HomeCredit => self
                .home_credit_payment
                .as_ref()
                .map(PaymentDetails::HomeCredit)
                .ok_or_else(missing),
            TransactionType::Skyro => {
                self.skyro_payment.as_ref().map(PaymentDetails::Skyro).ok_or_else(missing)
            }
            TransactionType::InHouseInstallment => self
                .in_house_installment
                .as_ref()
                .map(PaymentDetails::InHouse)
                .ok_or_else(missing),
        }
    }

    /// Whether the sale still carries an unpaid balance (false for cash).
    pub fn has_unpaid_balance(&self) -> bool {
        match self.payment_details() {
            Ok(PaymentDetails::Cash(_)) => false,
            Ok(PaymentDetails::HomeCredit(d)) | Ok(PaymentDetails::Skyro(d)) => !d.is_balance_paid,
            Ok(PaymentDetails::InHouse(d)) => !d.is_balance_paid,
            Err(_) => false,
        }
    }
}

/// A sale plus its storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSale {
    pub id: String,
    pub category: ItemCategory,
    pub record: SaleRecord,
}

// ---------------------------------------------------------------------------
// Service ledger entries
// ---------------------------------------------------------------------------

/// Credit (inflow) vs debit (outflow) on the service ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceEntryType {
    Credit,
    Debit,
}

impl ServiceEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceEntryType::Credit => "credit",
            ServiceEntryType::Debit => "debit",
        }
    }
}

/// Income classification for credit entries; drives the serviceFees vs
/// miscIncome split in the revenue breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceCategory {
    Service,
    Misc,
}

impl ServiceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceCategory::Service => "service",
            ServiceCategory::Misc => "misc",
        }
    }
}

/// One service-ledger entry (repair fee, load wallet top-up, misc income,
/// petty-cash outflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub date: String,
    pub description: String,
    pub entry_type: ServiceEntryType,
    #[serde(default = "ServiceEntry::default_category")]
    pub category: ServiceCategory,
    pub amount: f64,
    pub payment_source: PaymentSource,
    pub status: SaleStatus,
    #[serde(default)]
    pub recorded_by: String,
    pub timestamp: i64,
}

impl ServiceEntry {
    fn default_category() -> ServiceCategory {
        ServiceCategory::Service
    }
}

/// A service entry plus its storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredServiceEntry {
    pub id: String,
    pub entry: ServiceEntry,
}

// ---------------------------------------------------------------------------
// Display-date helpers
// ---------------------------------------------------------------------------

/// Month name for a 1-based month number.
pub(crate) fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

/// Parse a wire `date` field (YYYY-MM-DD).
pub(crate) fn parse_wire_date(date: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| EngineError::validation(format!("invalid date '{date}': {e}")))
}

/// Human-readable date string ("August 6, 2026") for a wire date.
pub(crate) fn display_date(date: NaiveDate) -> String {
    format!("{} {}, {}", month_name(date.month()), date.day(), date.year())
}

/// Wall-clock display time ("3:42 PM") for an epoch-millis instant.
pub(crate) fn display_time(timestamp_ms: i64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_default();
    let (is_pm, hour12) = dt.hour12();
    format!(
        "{}:{:02} {}",
        hour12,
        dt.minute(),
        if is_pm { "PM" } else { "AM" }
    )
}

// ===========================================================================
// Tests
// ===========================================================================
