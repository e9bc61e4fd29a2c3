//! Card-related types
//!
//! Defines the prepaid [`Card`], its validated [`CardNumber`], the
//! [`CardStatus`] state, and the [`Owner`] a card is bound to.

use crate::types::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal card identifier, assigned sequentially by the registry
pub type CardId = u64;

/// Owner (attendee) identifier, supplied by the caller
pub type OwnerId = u32;

/// Card number in the `TARJ-NNNNNN` format
///
/// Construction always goes through [`CardNumber::parse`], which trims the input,
/// upper-cases it and checks the prefix and the six digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardNumber(String);

impl CardNumber {
    /// Prefix shared by every card number
    pub const PREFIX: &'static str = "TARJ-";

    /// Number of digits after the prefix
    pub const DIGITS: usize = 6;

    /// Parse and normalise a card number
    ///
    /// # Errors
    ///
    /// Returns a Validation error when the number does not match `TARJ-NNNNNN`.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let valid = normalized
            .strip_prefix(Self::PREFIX)
            .is_some_and(|digits| {
                digits.len() == Self::DIGITS && digits.bytes().all(|b| b.is_ascii_digit())
            });

        if valid {
            Ok(Self(normalized))
        } else {
            Err(LedgerError::validation(format!(
                "card number '{}' must match the format TARJ-NNNNNN",
                raw.trim()
            )))
        }
    }

    /// Build a number from its numeric part (zero padded to six digits)
    pub(crate) fn from_digits(digits: u32) -> Self {
        Self(format!("{}{:06}", Self::PREFIX, digits % 1_000_000))
    }

    /// The full number as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four digits, used when a report must not expose the full number
    pub fn last_four(&self) -> &str {
        &self.0[self.0.len() - 4..]
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CardNumber {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CardNumber {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CardNumber> for String {
    fn from(number: CardNumber) -> Self {
        number.0
    }
}

/// Lifecycle state of a card
///
/// `Blocked` is reached only through a payment that leaves the balance at or
/// below zero, and left only through a top-up that makes it positive again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardStatus {
    /// Accepts payments (subject to funds) and top-ups
    Active,
    /// Rejects every payment, accepts top-ups
    Blocked,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => f.write_str("ACTIVE"),
            CardStatus::Blocked => f.write_str("BLOCKED"),
        }
    }
}

/// Prepaid card state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Registry identifier
    pub id: CardId,

    /// Unique card number
    pub number: CardNumber,

    /// Owner the card is currently bound to
    pub owner: OwnerId,

    /// Current balance, never negative
    pub balance: Decimal,

    /// ACTIVE or BLOCKED
    pub status: CardStatus,

    /// When the card was first created
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// Create a freshly assigned card: ACTIVE with a zero balance
    pub fn new(id: CardId, number: CardNumber, owner: OwnerId, created_at: DateTime<Utc>) -> Self {
        Card {
            id,
            number,
            owner,
            balance: Decimal::ZERO,
            status: CardStatus::Active,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CardStatus::Active
    }

    /// Rebind a card to `owner` and make it ACTIVE with a zero balance
    pub(crate) fn reactivate(&mut self, owner: OwnerId) {
        self.owner = owner;
        self.balance = Decimal::ZERO;
        self.status = CardStatus::Active;
    }
}

/// Card owner (event attendee)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Answer to a card verification request
///
/// Unknown numbers produce `exists == false` rather than an error so the check
/// can run before anyone is authenticated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardVerification {
    pub number: CardNumber,
    pub exists: bool,
    pub active: bool,
    pub assigned_owner: Option<OwnerId>,
    pub owner_name: Option<String>,
}

impl CardVerification {
    pub(crate) fn unknown(number: CardNumber) -> Self {
        CardVerification {
            number,
            exists: false,
            active: false,
            assigned_owner: None,
            owner_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::canonical("TARJ-123456", "TARJ-123456")]
    #[case::lowercase("tarj-000042", "TARJ-000042")]
    #[case::padded("  TARJ-999999 ", "TARJ-999999")]
    fn test_parse_valid_numbers(#[case] raw: &str, #[case] expected: &str) {
        let number = CardNumber::parse(raw).unwrap();
        assert_eq!(number.as_str(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::short("TARJ-12345")]
    #[case::long("TARJ-1234567")]
    #[case::letters("TARJ-12A456")]
    #[case::wrong_prefix("CARD-123456")]
    #[case::no_dash("TARJ123456")]
    fn test_parse_rejects_malformed_numbers(#[case] raw: &str) {
        let error = CardNumber::parse(raw).unwrap_err();
        assert!(matches!(error, LedgerError::Validation { .. }));
    }

    #[test]
    fn test_from_digits_zero_pads() {
        assert_eq!(CardNumber::from_digits(42).as_str(), "TARJ-000042");
        assert_eq!(CardNumber::from_digits(123456).as_str(), "TARJ-123456");
    }

    #[test]
    fn test_last_four() {
        let number = CardNumber::parse("TARJ-123456").unwrap();
        assert_eq!(number.last_four(), "3456");
    }

    #[test]
    fn test_new_card_is_active_with_zero_balance() {
        let card = Card::new(1, CardNumber::from_digits(1), 7, Utc::now());
        assert!(card.is_active());
        assert_eq!(card.balance, Decimal::ZERO);
    }

    #[test]
    fn test_reactivate_rebinds_owner() {
        let mut card = Card::new(1, CardNumber::from_digits(1), 7, Utc::now());
        card.status = CardStatus::Blocked;

        card.reactivate(8);

        assert_eq!(card.owner, 8);
        assert_eq!(card.status, CardStatus::Active);
        assert_eq!(card.balance, Decimal::ZERO);
    }
}
