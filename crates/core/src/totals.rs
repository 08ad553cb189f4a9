//! Quote totals.
//!
//! All amounts are `Decimal`. Totals are kept at [`STORAGE_SCALE`] and only
//! rounded to [`DISPLAY_SCALE`] by [`Totals::for_display`].

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{Discount, QuoteLine};
use crate::errors::DomainError;

pub const STORAGE_SCALE: u32 = 5;
pub const DISPLAY_SCALE: u32 = 2;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub gross: Decimal,
}

impl Totals {
    pub fn for_display(&self) -> Self {
        Self {
            subtotal: round(self.subtotal, DISPLAY_SCALE),
            discount_total: round(self.discount_total, DISPLAY_SCALE),
            tax_total: round(self.tax_total, DISPLAY_SCALE),
            gross: round(self.gross, DISPLAY_SCALE),
        }
    }
}

pub fn compute_totals(lines: &[QuoteLine], discount: Discount, shipping: Decimal) -> Totals {
    let subtotal: Decimal = lines.iter().map(QuoteLine::net_amount).sum();

    let discount_total = match discount {
        Discount::None => Decimal::ZERO,
        Discount::Percentage(rate) => subtotal * rate.max(Decimal::ZERO) / HUNDRED,
        Discount::Fixed(amount) => amount.max(Decimal::ZERO),
    }
    .min(subtotal)
    .max(Decimal::ZERO);

    // Discount is spread over lines in proportion to their value.
    let tax_total: Decimal = if subtotal.is_zero() {
        Decimal::ZERO
    } else {
        lines
            .iter()
            .map(|line| {
                let value = line.net_amount();
                let share = discount_total * value / subtotal;
                (value - share) * line.tax_rate / HUNDRED
            })
            .sum()
    };

    let gross = subtotal - discount_total + tax_total + shipping;

    Totals {
        subtotal: round(subtotal, STORAGE_SCALE),
        discount_total: round(discount_total, STORAGE_SCALE),
        tax_total: round(tax_total, STORAGE_SCALE),
        gross: round(gross, STORAGE_SCALE),
    }
}

pub fn validate_pricing_inputs(
    lines: &[QuoteLine],
    discount: Discount,
    shipping: Decimal,
) -> Result<(), DomainError> {
    for (index, line) in lines.iter().enumerate() {
        let position = index + 1;
        if line.description.trim().is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "line {position}: description is required"
            )));
        }
        if line.quantity <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation(format!(
                "line {position}: quantity must be greater than zero"
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(DomainError::InvariantViolation(format!(
                "line {position}: unit price must not be negative"
            )));
        }
        if line.tax_rate < Decimal::ZERO || line.tax_rate > HUNDRED {
            return Err(DomainError::InvariantViolation(format!(
                "line {position}: tax rate must be within 0..=100"
            )));
        }
    }

    match discount {
        Discount::Percentage(rate) if rate < Decimal::ZERO || rate > HUNDRED => {
            return Err(DomainError::InvariantViolation(
                "percentage discount must be within 0..=100".to_string(),
            ));
        }
        Discount::Fixed(amount) if amount < Decimal::ZERO => {
            return Err(DomainError::InvariantViolation(
                "fixed discount must not be negative".to_string(),
            ));
        }
        _ => {}
    }

    if shipping < Decimal::ZERO {
        return Err(DomainError::InvariantViolation("shipping must not be negative".to_string()));
    }

    Ok(())
}

fn round(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
