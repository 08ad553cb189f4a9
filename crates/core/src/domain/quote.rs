use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::product::ProductId;
use crate::totals::{compute_totals, Totals};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable number, unique per company and year, e.g. `Q-2026-0007`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub fn format(prefix: &str, year: i32, sequence: u32) -> Self {
        Self(format!("{prefix}-{year}-{sequence:04}"))
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

/// User identity behind a change. `None` in its place means the system acted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 7] = [
        Self::Draft,
        Self::Sent,
        Self::Pending,
        Self::Accepted,
        Self::Rejected,
        Self::Expired,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Sent => "Sent",
            Self::Pending => "Awaiting response",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Expired => "Expired",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired | Self::Cancelled)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    #[default]
    None,
    /// Rate in percent, `0..=100`.
    Percentage(Decimal),
    Fixed(Decimal),
}

impl Discount {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Percentage(_) => "percentage",
            Self::Fixed(_) => "fixed",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            Self::None => Decimal::ZERO,
            Self::Percentage(value) | Self::Fixed(value) => *value,
        }
    }

    pub fn from_parts(kind: &str, value: Decimal) -> Option<Self> {
        match kind {
            "none" => Some(Self::None),
            "percentage" => Some(Self::Percentage(value)),
            "fixed" => Some(Self::Fixed(value)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percent, `0..=100`.
    pub tax_rate: Decimal,
    pub product_id: Option<ProductId>,
}

impl QuoteLine {
    pub fn net_amount(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub quote_number: Option<QuoteNumber>,
    pub company_id: CompanyId,
    pub client_id: ClientId,
    pub status: QuoteStatus,
    pub quote_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub sent_at: Option<DateTime<Utc>>,
    pub lines: Vec<QuoteLine>,
    pub discount: Discount,
    pub shipping: Decimal,
    pub totals: Totals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn recompute_totals(&mut self) {
        self.totals = compute_totals(&self.lines, self.discount, self.shipping);
    }

    pub fn display_number(&self) -> &str {
        self.quote_number.as_ref().map(|number| number.0.as_str()).unwrap_or(self.id.0.as_str())
    }
}

/// Input for the creation path. Status, totals and timestamps are derived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewQuote {
    pub company_id: CompanyId,
    pub client_id: ClientId,
    pub quote_number: Option<QuoteNumber>,
    pub quote_date: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub lines: Vec<QuoteLine>,
    pub discount: Discount,
    pub shipping: Decimal,
}

/// Replacement content for a quote that is still a draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRevision {
    pub lines: Vec<QuoteLine>,
    pub discount: Discount,
    pub shipping: Decimal,
    pub valid_until: Option<NaiveDate>,
}
