//! Transaction-related types for the card ledger
//!
//! This module defines the validated [`Amount`], the [`TransactionKind`] and the
//! immutable [`Transaction`] record produced for every accepted balance mutation.

use crate::types::card::{CardId, CardNumber};
use crate::types::error::LedgerError;
use crate::types::point_of_sale::PosId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction identifier
///
/// Assigned sequentially by the transaction log, starting at 1
pub type TransactionId = u64;

/// Number of fractional digits kept for amounts and balances
pub const AMOUNT_SCALE: u32 = 2;

/// Balance mutations supported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Credit funds to a card
    ///
    /// Accepted on ACTIVE and BLOCKED cards. Unblocks a BLOCKED card when the
    /// resulting balance is positive.
    TopUp,

    /// Debit funds from a card at a point of sale
    ///
    /// Requires an ACTIVE card with enough balance. Blocks the card when the
    /// resulting balance reaches zero.
    Payment,
}

impl TransactionKind {
    /// Apply the sign of this kind to `amount`
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionKind::TopUp => amount,
            TransactionKind::Payment => -amount,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::TopUp => "TOPUP",
            TransactionKind::Payment => "PAYMENT",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topup" | "top_up" | "top-up" => Ok(TransactionKind::TopUp),
            "payment" | "pay" => Ok(TransactionKind::Payment),
            other => Err(LedgerError::validation(format!(
                "unknown transaction kind '{}'",
                other
            ))),
        }
    }
}

/// Positive monetary amount with at most two fractional digits
///
/// An `Amount` can only be built through its validating constructors, so any
/// value reaching the ledger is known to fit the `DECIMAL(10,2)` storage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// Largest amount or balance the ledger accepts: 99,999,999.99
    pub fn max_balance() -> Decimal {
        Decimal::new(9_999_999_999, AMOUNT_SCALE)
    }

    /// Validate a decimal amount
    ///
    /// # Errors
    ///
    /// Validation error when the amount is zero or negative, carries more than
    /// two fractional digits, or exceeds [`Amount::max_balance`].
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "amount must be greater than zero, got {}",
                value
            )));
        }
        if value.normalize().scale() > AMOUNT_SCALE {
            return Err(LedgerError::validation(format!(
                "amount {} has more than {} decimal places",
                value, AMOUNT_SCALE
            )));
        }
        if value > Self::max_balance() {
            return Err(LedgerError::validation(format!(
                "amount {} exceeds the maximum of {}",
                value,
                Self::max_balance()
            )));
        }

        let mut value = value;
        value.rescale(AMOUNT_SCALE);
        Ok(Amount(value))
    }

    /// Parse and validate an amount from text
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let value = Decimal::from_str(raw.trim()).map_err(|_| {
            LedgerError::validation(format!("amount '{}' is not a valid number", raw.trim()))
        })?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Committed balance mutation
///
/// Immutable once created. `balance_after` always equals `balance_before` plus the
/// signed amount, so replaying a card's transactions in order from zero reproduces
/// its balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sequential identifier, unique across all cards
    pub id: TransactionId,

    /// Registry identifier of the card
    pub card_id: CardId,

    /// Card the mutation applied to
    pub card_number: CardNumber,

    /// TOPUP or PAYMENT
    pub kind: TransactionKind,

    /// Positive amount with two fractional digits
    pub amount: Decimal,

    /// Card balance before the mutation
    pub balance_before: Decimal,

    /// Card balance after the mutation
    pub balance_after: Decimal,

    /// Point of sale charged (payments only)
    pub point_of_sale: Option<PosId>,

    /// Free-text description
    pub note: String,

    /// Commit time
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount with the sign of its effect on the balance
    pub fn signed_amount(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}
