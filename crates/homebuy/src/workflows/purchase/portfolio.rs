use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};

use super::domain::{Money, OfferId, PropertyId};
use super::error::EngineError;
use super::offers::{Offer, OfferStatus};
use super::payments::{Payment, PaymentLedger};

/// Dashboard bucket for an approved offer with verified payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioClassification {
    InProgress,
    Owned,
}

impl PortfolioClassification {
    pub const fn label(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Owned => "owned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub offer_id: OfferId,
    pub property_id: PropertyId,
    /// Sum of completed payments; may exceed the offer price.
    pub total_paid: Money,
    pub percent_complete: u8,
    pub remaining: Money,
    pub is_fully_paid: bool,
}

impl PortfolioEntry {
    pub fn classification(&self) -> PortfolioClassification {
        if self.is_fully_paid {
            PortfolioClassification::Owned
        } else {
            PortfolioClassification::InProgress
        }
    }
}

/// Folds the completed payments of an approved offer into a progress entry.
pub fn aggregate(offer: &Offer, payments: &[Payment]) -> Result<PortfolioEntry, EngineError> {
    if offer.status() != OfferStatus::Approved {
        return Err(EngineError::OfferNotApproved {
            offer_id: offer.id.clone(),
            status: offer.status(),
        });
    }

    let ledger = PaymentLedger::from_payments(offer.id.clone(), payments.iter().cloned());
    let total_paid = ledger.total_completed()?;
    let percent_complete = percent_of(total_paid, offer.offer_price);

    Ok(PortfolioEntry {
        offer_id: offer.id.clone(),
        property_id: offer.property_id.clone(),
        total_paid,
        percent_complete,
        remaining: (offer.offer_price - total_paid).max(Money::ZERO),
        is_fully_paid: percent_complete >= 100,
    })
}

/// Portfolio-eligible entries: approved offers with at least one completed payment.
pub fn portfolio<'a>(
    offers: impl IntoIterator<Item = &'a Offer>,
    payments: &[Payment],
) -> Result<Vec<PortfolioEntry>, EngineError> {
    offers
        .into_iter()
        .filter(|offer| offer.status() == OfferStatus::Approved)
        .filter(|offer| {
            PaymentLedger::from_payments(offer.id.clone(), payments.iter().cloned())
                .has_completed()
        })
        .map(|offer| aggregate(offer, payments))
        .collect()
}

/// Whole percent of `price` covered by `paid`, rounded half up and clamped to 0..=100.
fn percent_of(paid: Money, price: Money) -> u8 {
    let ratio = paid
        .checked_mul(Money::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(price));

    match ratio {
        Some(ratio) => ratio
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .clamp(Money::ZERO, Money::ONE_HUNDRED)
            .to_u8()
            .unwrap_or(0),
        None if paid > Money::ZERO => 100,
        None => 0,
    }
}
