//! Ledger commands and their outcomes
//!
//! A [`LedgerCommand`] is one request to the ledger, as read by the batch front end.
//! [`crate::core::LedgerEngine::execute`] turns it into a [`CommandOutcome`].

use crate::types::card::{Card, CardNumber, OwnerId};
use crate::types::point_of_sale::PosId;
use crate::types::transaction::TransactionId;
use rust_decimal::Decimal;
use serde::Serialize;

/// One request to the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Add an attendee to the owner roster
    RegisterOwner {
        owner: OwnerId,
        name: String,
        email: Option<String>,
        phone: Option<String>,
    },

    /// Assign a card to an owner, generating a number when none is given
    Assign {
        owner: OwnerId,
        card: Option<String>,
    },

    /// Credit a card
    TopUp { card: String, amount: Decimal },

    /// Charge a card at a point of sale
    Pay {
        card: String,
        amount: Decimal,
        pos: PosId,
        note: Option<String>,
    },
}

impl LedgerCommand {
    /// Key that orders this command relative to others
    ///
    /// Balance mutations return the normalised card number: commands sharing a key
    /// must run in input order, commands with different keys may run concurrently.
    /// Registrations and assignments return `None` and act as barriers, since they
    /// touch registry-wide state.
    pub fn partition_key(&self) -> Option<String> {
        match self {
            LedgerCommand::RegisterOwner { .. } | LedgerCommand::Assign { .. } => None,
            LedgerCommand::TopUp { card, .. } | LedgerCommand::Pay { card, .. } => {
                Some(card.trim().to_ascii_uppercase())
            }
        }
    }

    /// Short operation name for logs
    pub fn op(&self) -> &'static str {
        match self {
            LedgerCommand::RegisterOwner { .. } => "owner",
            LedgerCommand::Assign { .. } => "assign",
            LedgerCommand::TopUp { .. } => "topup",
            LedgerCommand::Pay { .. } => "pay",
        }
    }
}

/// Result of a successful top-up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopUpReceipt {
    pub card_number: CardNumber,
    pub transaction_id: TransactionId,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    /// The top-up moved the card from BLOCKED to ACTIVE
    pub unblocked: bool,
}

/// Result of a successful payment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub card_number: CardNumber,
    pub transaction_id: TransactionId,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub point_of_sale: PosId,
    /// The payment moved the card from ACTIVE to BLOCKED
    pub blocked: bool,
}

/// Result of a successfully executed [`LedgerCommand`]
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    OwnerRegistered(OwnerId),
    CardAssigned(Card),
    ToppedUp(TopUpReceipt),
    Paid(PaymentReceipt),
}
