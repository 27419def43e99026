//! Pricing calculator.
//!
//! Derives a sale's final price and per-method fields from raw checkout
//! inputs. Out-of-range inputs are clamped and reported as warnings on the
//! result; the calculator never fails, so entry is never blocked.

use crate::models::TransactionType;

/// Tolerance used when comparing computed money values.
pub const MONEY_EPSILON: f64 = 0.01;

/// Raw checkout inputs. `discount_amount` wins when both discount fields are
/// supplied; the other is recomputed from it.
#[derive(Debug, Clone)]
pub struct PricingInput {
    pub price: f64,
    pub discount_amount: Option<f64>,
    pub discount_percent: Option<f64>,
    pub transaction_type: TransactionType,
    pub downpayment_amount: f64,
    pub interest_percent: f64,
    pub months_to_pay: u32,
}

/// Per-method derived fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodPricing {
    Cash {
        amount_due: f64,
    },
    /// Home Credit / Skyro: down payment now, one lump balance with the partner.
    PartnerFinanced {
        downpayment: f64,
        balance: f64,
    },
    InHouse {
        downpayment: f64,
        interest_percent: f64,
        interest_amount: f64,
        months_to_pay: u32,
        monthly_amount: f64,
        total_amount_due: f64,
    },
}

/// Final pricing plus any clamp warnings for the operator.
#[derive(Debug, Clone)]
pub struct PricingResult {
    pub price: f64,
    pub discount_amount: f64,
    pub discount_percent: f64,
    pub final_price: f64,
    pub method: MethodPricing,
    pub warnings: Vec<String>,
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Discount amount for a percent edit (clamped, 2 decimals).
pub fn discount_amount_from_percent(price: f64, percent: f64) -> f64 {
    let percent = percent.clamp(0.0, 100.0);
    round2(price.max(0.0) * percent / 100.0)
}

/// Discount percent for an amount edit (clamped, 1 decimal). 0 when price is 0.
pub fn discount_percent_from_amount(price: f64, amount: f64) -> f64 {
    let price = price.max(0.0);
    if price <= 0.0 {
        return 0.0;
    }
    let amount = amount.clamp(0.0, price);
    round1(amount / price * 100.0)
}

/// Compute the full pricing for a checkout.
pub fn compute_pricing(input: &PricingInput) -> PricingResult {
    let mut warnings = Vec::new();

    let price = if input.price < 0.0 {
        warnings.push(format!("price {} is negative, using 0", input.price));
        0.0
    } else {
        input.price
    };

    // Discount: amount is authoritative when present, percent otherwise.
    let (discount_amount, discount_percent) = match (input.discount_amount, input.discount_percent)
    {
        (Some(amount), _) => {
            let clamped = amount.clamp(0.0, price);
            if (clamped - amount).abs() > MONEY_EPSILON {
                warnings.push(format!(
                    "discount {amount} out of range, clamped to {clamped}"
                ));
            }
            (round2(clamped), discount_percent_from_amount(price, clamped))
        }
        (None, Some(percent)) => {
            let clamped = percent.clamp(0.0, 100.0);
            if (clamped - percent).abs() > f64::EPSILON {
                warnings.push(format!(
                    "discount percent {percent} out of range, clamped to {clamped}"
                ));
            }
            (discount_amount_from_percent(price, clamped), round1(clamped))
        }
        (None, None) => (0.0, 0.0),
    };

    let final_price = round2(price - discount_amount);

    let method = match input.transaction_type {
        TransactionType::Cash => MethodPricing::Cash {
            amount_due: final_price,
        },
        TransactionType::HomeCredit | TransactionType::Skyro => {
            let downpayment = clamp_downpayment(input.downpayment_amount, final_price, &mut warnings);
            MethodPricing::PartnerFinanced {
                downpayment,
                balance: round2(final_price - downpayment),
            }
        }
        TransactionType::InHouseInstallment => {
            let downpayment = clamp_downpayment(input.downpayment_amount, final_price, &mut warnings);
            let interest_percent = clamp_percent(input.interest_percent, "interest", &mut warnings);
            let principal = final_price - downpayment;
            let interest_amount = round2(principal * interest_percent / 100.0);
            let total_amount_due = round2(principal + interest_amount);
            let monthly_amount = if input.months_to_pay > 0 {
                round2(total_amount_due / input.months_to_pay as f64)
            } else {
                0.0
            };
            MethodPricing::InHouse {
                downpayment,
                interest_percent,
                interest_amount,
                months_to_pay: input.months_to_pay,
                monthly_amount,
                total_amount_due,
            }
        }
    };

    PricingResult {
        price,
        discount_amount,
        discount_percent,
        final_price,
        method,
        warnings,
    }
}

fn clamp_downpayment(downpayment: f64, final_price: f64, warnings: &mut Vec<String>) -> f64 {
    let clamped = downpayment.clamp(0.0, final_price);
    if (clamped - downpayment).abs() > MONEY_EPSILON {
        warnings.push(format!(
            "down payment {downpayment} out of range, clamped to {clamped}"
        ));
    }
    round2(clamped)
}

fn clamp_percent(percent: f64, label: &str, warnings: &mut Vec<String>) -> f64 {
    let clamped = percent.clamp(0.0, 100.0);
    if (clamped - percent).abs() > f64::EPSILON {
        warnings.push(format!(
            "{label} percent {percent} out of range, clamped to {clamped}"
        ));
    }
    clamped
}

// ===========================================================================
// Tests
// ===========================================================================
