//! Ledger engine: balance mutations and the card state machine
//!
//! This module provides the [`LedgerEngine`], the only component that changes card
//! balances and statuses.
//!
//! # State machine
//!
//! - ACTIVE accepts payments (subject to funds) and top-ups
//! - BLOCKED rejects every payment and accepts top-ups
//! - ACTIVE becomes BLOCKED after a payment that leaves the balance at or below zero
//! - BLOCKED becomes ACTIVE after a top-up that leaves the balance above zero
//!
//! # Critical section
//!
//! A mutation waits for its card lock (bounded by the lock timeout) and then runs
//! validate, journal, mutate and append without any further `.await`. Dropping the
//! future while it waits for the lock leaves no effect; once the lock is held the
//! mutation either fails before the journal commit or completes in full.

use crate::core::card_registry::CardRegistry;
use crate::core::config::LedgerConfig;
use crate::core::journal::{InMemoryJournal, JournalEntry};
use crate::core::point_of_sale::PointOfSaleDirectory;
use crate::core::report::ReportAggregator;
use crate::core::traits::{Clock, Journal, SystemClock};
use crate::core::transaction_log::TransactionLog;
use crate::types::{
    Amount, Card, CardNumber, CardStatus, CardVerification, CommandOutcome, LedgerCommand,
    LedgerError, Owner, OwnerId, PaymentReceipt, PosId, TopUpReceipt, Transaction,
    TransactionKind,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Balance change computed against a card before it is committed
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mutation {
    kind: TransactionKind,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    status_before: CardStatus,
    status_after: CardStatus,
}

impl Mutation {
    fn top_up(card: &Card, amount: Amount) -> Result<Self, LedgerError> {
        let balance_after = card.balance + amount.value();
        if balance_after > Amount::max_balance() {
            return Err(LedgerError::validation(format!(
                "top-up of {} would take card {} to {}, above the maximum balance of {}",
                amount,
                card.number,
                balance_after,
                Amount::max_balance()
            )));
        }

        let status_after = if card.status == CardStatus::Blocked && balance_after > Decimal::ZERO {
            CardStatus::Active
        } else {
            card.status
        };

        Ok(Mutation {
            kind: TransactionKind::TopUp,
            amount: amount.value(),
            balance_before: card.balance,
            balance_after,
            status_before: card.status,
            status_after,
        })
    }

    fn payment(card: &Card, amount: Amount) -> Result<Self, LedgerError> {
        if card.status == CardStatus::Blocked {
            return Err(LedgerError::blocked_card(&card.number));
        }
        if card.balance < amount.value() {
            return Err(LedgerError::insufficient_funds(
                &card.number,
                card.balance,
                amount.value(),
            ));
        }

        let balance_after = card.balance - amount.value();
        let status_after = if balance_after <= Decimal::ZERO {
            CardStatus::Blocked
        } else {
            CardStatus::Active
        };

        Ok(Mutation {
            kind: TransactionKind::Payment,
            amount: amount.value(),
            balance_before: card.balance,
            balance_after,
            status_before: card.status,
            status_after,
        })
    }

    /// Recompute a journaled transaction against the card it was applied to
    ///
    /// The recorded balances must agree with what the state machine produces now.
    fn replay(card: &Card, tx: &Transaction) -> Result<Self, LedgerError> {
        let replay_error = |reason: String| {
            LedgerError::persistence(format!(
                "journal transaction {} does not apply to card {}: {}",
                tx.id, card.number, reason
            ))
        };

        let amount = Amount::new(tx.amount).map_err(|e| replay_error(e.to_string()))?;
        let mutation = match tx.kind {
            TransactionKind::TopUp => Self::top_up(card, amount),
            TransactionKind::Payment => Self::payment(card, amount),
        }
        .map_err(|e| replay_error(e.to_string()))?;

        if mutation.balance_before != tx.balance_before || mutation.balance_after != tx.balance_after
        {
            return Err(replay_error(format!(
                "recorded {} -> {}, computed {} -> {}",
                tx.balance_before, tx.balance_after, mutation.balance_before, mutation.balance_after
            )));
        }
        Ok(mutation)
    }

    fn apply(&self, card: &mut Card) {
        card.balance = self.balance_after;
        card.status = self.status_after;
    }

    fn blocked(&self) -> bool {
        self.status_before == CardStatus::Active && self.status_after == CardStatus::Blocked
    }

    fn unblocked(&self) -> bool {
        self.status_before == CardStatus::Blocked && self.status_after == CardStatus::Active
    }
}

/// Card balance ledger
///
/// Cheap to clone: every clone shares the same registry, log and journal, so a
/// clone can be moved into a spawned task.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    registry: Arc<CardRegistry>,
    log: Arc<TransactionLog>,
    points_of_sale: Arc<PointOfSaleDirectory>,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
}

impl LedgerEngine {
    /// Engine with an in-memory journal and the default points of sale
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_journal(config, Arc::new(InMemoryJournal::new()))
    }

    /// Engine committing to `journal`, with the default points of sale
    pub fn with_journal(config: LedgerConfig, journal: Arc<dyn Journal>) -> Self {
        Self::with_parts(
            config,
            journal,
            Arc::new(SystemClock),
            PointOfSaleDirectory::with_defaults(),
        )
    }

    /// Engine assembled from explicit parts
    ///
    /// # Arguments
    ///
    /// * `config` - Lock timeout and card number seed
    /// * `journal` - Commit point of every mutation
    /// * `clock` - Timestamp source
    /// * `points_of_sale` - Catalog payments are checked against
    pub fn with_parts(
        config: LedgerConfig,
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        points_of_sale: PointOfSaleDirectory,
    ) -> Self {
        let registry = CardRegistry::new(&config, Arc::clone(&journal), Arc::clone(&clock));
        Self {
            registry: Arc::new(registry),
            log: Arc::new(TransactionLog::new()),
            points_of_sale: Arc::new(points_of_sale),
            journal,
            clock,
        }
    }

    pub fn registry(&self) -> &CardRegistry {
        &self.registry
    }

    pub fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn points_of_sale(&self) -> &PointOfSaleDirectory {
        &self.points_of_sale
    }

    /// Read-only report views over this engine's transaction log
    pub fn reports(&self) -> ReportAggregator {
        ReportAggregator::new(Arc::clone(&self.log), Arc::clone(&self.points_of_sale))
    }

    /// Rebuild state from journal entries, then check every card against its history
    ///
    /// Must run on a fresh engine, before it serves any request.
    ///
    /// # Errors
    ///
    /// `LedgerError::Persistence` if an entry does not apply or a balance does not
    /// match its replayed history.
    pub async fn replay(&self, entries: &[JournalEntry]) -> Result<(), LedgerError> {
        for entry in entries {
            match entry {
                JournalEntry::OwnerRegistered(owner) => {
                    self.registry.restore_owner(owner.clone()).await?
                }
                JournalEntry::CardAssigned {
                    card_id,
                    number,
                    owner,
                    reactivated,
                    at,
                } => {
                    self.registry
                        .restore_assignment(*card_id, number.clone(), *owner, *reactivated, *at)
                        .await?
                }
                JournalEntry::Transaction(tx) => {
                    let mut card = self.registry.acquire(&tx.card_number).await.map_err(|e| {
                        LedgerError::persistence(format!(
                            "journal transaction {} does not apply: {}",
                            tx.id, e
                        ))
                    })?;
                    let mutation = Mutation::replay(&card, tx)?;
                    mutation.apply(&mut card);
                    self.log.restore(tx.clone());
                }
            }
        }

        self.verify_consistency().await?;
        info!(
            entries = entries.len(),
            cards = self.registry.len(),
            transactions = self.log.len(),
            "Replayed journal"
        );
        Ok(())
    }

    pub async fn register_owner(
        &self,
        id: OwnerId,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Owner, LedgerError> {
        self.registry.register_owner(id, name, email, phone).await
    }

    pub async fn assign_card(
        &self,
        owner: OwnerId,
        requested: Option<&str>,
    ) -> Result<Card, LedgerError> {
        self.registry.assign(owner, requested).await
    }

    /// Credit a card
    ///
    /// Produces exactly one TOPUP transaction. A BLOCKED card whose balance becomes
    /// positive is unblocked.
    ///
    /// # Arguments
    ///
    /// * `card` - Card number, trimmed and upper-cased before lookup
    /// * `amount` - Positive amount with at most two fractional digits
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` for a bad amount or number, or a balance that
    ///   would exceed 99,999,999.99
    /// * `LedgerError::NotFound` for an unknown card
    /// * `LedgerError::Retryable` if the card lock timed out or the journal had a
    ///   transient fault
    /// * `LedgerError::Persistence` if the journal rejected the commit
    pub async fn top_up(&self, card: &str, amount: Decimal) -> Result<TopUpReceipt, LedgerError> {
        let amount = Amount::new(amount)?;
        let number = CardNumber::parse(card)?;

        let mut card = self.registry.acquire(&number).await?;

        let mutation = Mutation::top_up(&card, amount)?;
        let note = format!("Top-up of {}", amount);
        let tx = self.commit(&mut card, mutation, None, note)?;

        if mutation.unblocked() {
            info!(card = %number, balance = %tx.balance_after, "Card unblocked by top-up");
        }
        Ok(TopUpReceipt {
            card_number: number,
            transaction_id: tx.id,
            previous_balance: tx.balance_before,
            new_balance: tx.balance_after,
            unblocked: mutation.unblocked(),
        })
    }

    /// Charge a card at a point of sale
    ///
    /// Checks run in order: amount, card number format, point of sale, card lock,
    /// blocked status, funds. A payment that leaves the balance at zero blocks the
    /// card.
    ///
    /// # Arguments
    ///
    /// * `card` - Card number, trimmed and upper-cased before lookup
    /// * `amount` - Positive amount with at most two fractional digits
    /// * `pos` - Point of sale charged; it must exist but may be inactive
    /// * `note` - Description, defaulting to `Payment at <point of sale>`
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` for a bad amount or number
    /// * `LedgerError::NotFound` for an unknown point of sale or card
    /// * `LedgerError::BlockedCard` if the card is BLOCKED
    /// * `LedgerError::InsufficientFunds` if the balance is below the amount
    /// * `LedgerError::Retryable` / `LedgerError::Persistence` as for [`Self::top_up`]
    pub async fn pay(
        &self,
        card: &str,
        amount: Decimal,
        pos: PosId,
        note: Option<&str>,
    ) -> Result<PaymentReceipt, LedgerError> {
        let amount = Amount::new(amount)?;
        let number = CardNumber::parse(card)?;
        let point_of_sale = self.points_of_sale.get(pos)?;

        let mut card = self.registry.acquire(&number).await?;

        let mutation = Mutation::payment(&card, amount)?;
        let note = note
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Payment at {}", point_of_sale.name));
        let tx = self.commit(&mut card, mutation, Some(pos), note)?;

        if mutation.blocked() {
            info!(card = %number, "Card blocked after payment emptied it");
        }
        Ok(PaymentReceipt {
            card_number: number,
            transaction_id: tx.id,
            previous_balance: tx.balance_before,
            new_balance: tx.balance_after,
            point_of_sale: pos,
            blocked: mutation.blocked(),
        })
    }

    /// Journal, apply and log a validated mutation
    ///
    /// Runs while the caller holds the card lock. Nothing changes unless the journal
    /// append succeeds.
    fn commit(
        &self,
        card: &mut Card,
        mutation: Mutation,
        point_of_sale: Option<PosId>,
        note: String,
    ) -> Result<Transaction, LedgerError> {
        let tx = Transaction {
            id: self.log.next_id(),
            card_id: card.id,
            card_number: card.number.clone(),
            kind: mutation.kind,
            amount: mutation.amount,
            balance_before: mutation.balance_before,
            balance_after: mutation.balance_after,
            point_of_sale,
            note,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.journal.append(&JournalEntry::Transaction(tx.clone())) {
            error!(
                card = %card.number,
                kind = %tx.kind,
                error = %e,
                "Journal commit failed; card left unchanged"
            );
            return Err(e);
        }

        mutation.apply(card);
        self.log.append(tx.clone());

        debug!(
            card = %card.number,
            tx = tx.id,
            kind = %tx.kind,
            amount = %tx.amount,
            balance = %tx.balance_after,
            "Committed transaction"
        );
        Ok(tx)
    }

    /// Current balance of a card
    pub async fn get_balance(&self, card: &str) -> Result<Decimal, LedgerError> {
        Ok(self.registry.lookup_by_number(card).await?.balance)
    }

    /// Transactions of a card, most recent first
    pub async fn get_history(&self, card: &str) -> Result<Vec<Transaction>, LedgerError> {
        let number = self.existing_card(card)?;
        Ok(self.log.history(&number))
    }

    /// Existence and assignment status of a card number
    pub async fn verify_card(&self, card: &str) -> Result<CardVerification, LedgerError> {
        self.registry.status(card).await
    }

    /// Balance obtained by replaying a card's transactions from zero
    pub async fn reconstruct_balance(&self, card: &str) -> Result<Decimal, LedgerError> {
        let number = self.existing_card(card)?;
        Ok(self.log.reconstruct_balance(&number))
    }

    /// Check every card's balance against its replayed history
    ///
    /// # Errors
    ///
    /// `LedgerError::Persistence` naming the first card whose balance differs
    pub async fn verify_consistency(&self) -> Result<(), LedgerError> {
        for card in self.registry.cards().await? {
            let replayed = self.log.reconstruct_balance(&card.number);
            if replayed != card.balance {
                error!(
                    card = %card.number,
                    balance = %card.balance,
                    replayed = %replayed,
                    "Balance does not match transaction history"
                );
                return Err(LedgerError::persistence(format!(
                    "card {} holds {} but its history sums to {}",
                    card.number, card.balance, replayed
                )));
            }
            if card.balance < Decimal::ZERO {
                return Err(LedgerError::persistence(format!(
                    "card {} has a negative balance {}",
                    card.number, card.balance
                )));
            }
        }
        Ok(())
    }

    /// Run one ledger command
    pub async fn execute(&self, command: LedgerCommand) -> Result<CommandOutcome, LedgerError> {
        match command {
            LedgerCommand::RegisterOwner {
                owner,
                name,
                email,
                phone,
            } => self
                .register_owner(owner, &name, email.as_deref(), phone.as_deref())
                .await
                .map(|owner| CommandOutcome::OwnerRegistered(owner.id)),
            LedgerCommand::Assign { owner, card } => self
                .assign_card(owner, card.as_deref())
                .await
                .map(CommandOutcome::CardAssigned),
            LedgerCommand::TopUp { card, amount } => self
                .top_up(&card, amount)
                .await
                .map(CommandOutcome::ToppedUp),
            LedgerCommand::Pay {
                card,
                amount,
                pos,
                note,
            } => self
                .pay(&card, amount, pos, note.as_deref())
                .await
                .map(CommandOutcome::Paid),
        }
    }

    fn existing_card(&self, card: &str) -> Result<CardNumber, LedgerError> {
        let number = CardNumber::parse(card)?;
        if self.registry.contains(&number) {
            Ok(number)
        } else {
            Err(LedgerError::card_not_found(&number))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn engine_with_card(number: &str) -> LedgerEngine {
        let engine = LedgerEngine::new(LedgerConfig::default());
        engine.register_owner(1, "Ana", None, None).await.unwrap();
        engine.assign_card(1, Some(number)).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_top_up_then_pay_records_history() {
        let engine = engine_with_card("TARJ-000001").await;

        let top_up = engine.top_up("TARJ-000001", dec!(50.00)).await.unwrap();
        assert_eq!(top_up.new_balance, dec!(50.00));
        assert!(!top_up.unblocked);

        let payment = engine
            .pay("TARJ-000001", dec!(20.00), 1, None)
            .await
            .unwrap();
        assert_eq!(payment.new_balance, dec!(30.00));
        assert!(!payment.blocked);

        let history = engine.get_history("TARJ-000001").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionKind::Payment);
        assert_eq!(history[0].note, "Payment at Main Restaurant");
        assert_eq!(history[1].note, "Top-up of 50.00");
    }

    #[tokio::test]
    async fn test_fresh_card_is_active_but_cannot_pay() {
        let engine = engine_with_card("TARJ-000001").await;

        let status = engine.verify_card("TARJ-000001").await.unwrap();
        assert!(status.exists && status.active);

        let error = engine
            .pay("TARJ-000001", dec!(10), 1, None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InsufficientFunds);
        assert!(engine.transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_exact_payment_blocks_card() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(30.00)).await.unwrap();

        let payment = engine
            .pay("TARJ-000001", dec!(30.00), 1, None)
            .await
            .unwrap();

        assert_eq!(payment.new_balance, dec!(0.00));
        assert!(payment.blocked);
        let card = engine.registry().lookup_by_number("TARJ-000001").await.unwrap();
        assert_eq!(card.status, CardStatus::Blocked);
    }

    #[tokio::test]
    async fn test_blocked_card_rejects_payment() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(10.00)).await.unwrap();
        engine.pay("TARJ-000001", dec!(10.00), 1, None).await.unwrap();

        let error = engine
            .pay("TARJ-000001", dec!(1.00), 1, None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::BlockedCard);
        assert_eq!(engine.get_history("TARJ-000001").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_top_up_unblocks_card() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(10.00)).await.unwrap();
        engine.pay("TARJ-000001", dec!(10.00), 1, None).await.unwrap();

        let top_up = engine.top_up("TARJ-000001", dec!(50.00)).await.unwrap();

        assert!(top_up.unblocked);
        assert_eq!(top_up.new_balance, dec!(50.00));
        let status = engine.verify_card("TARJ-000001").await.unwrap();
        assert!(status.active);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_card_untouched() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(10.00)).await.unwrap();

        let error = engine
            .pay("TARJ-000001", dec!(15.00), 1, None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(10.00));
        assert_eq!(engine.get_history("TARJ-000001").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_amounts_and_numbers_are_rejected() {
        let engine = engine_with_card("TARJ-000001").await;

        let zero = engine.top_up("TARJ-000001", dec!(0)).await.unwrap_err();
        let negative = engine.top_up("TARJ-000001", dec!(-5)).await.unwrap_err();
        let precise = engine.top_up("TARJ-000001", dec!(1.005)).await.unwrap_err();
        let malformed = engine.top_up("1234", dec!(5)).await.unwrap_err();

        for error in [zero, negative, precise, malformed] {
            assert_eq!(error.kind(), ErrorKind::Validation);
        }
        assert!(engine.transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_card_and_point_of_sale() {
        let engine = engine_with_card("TARJ-000001").await;

        let card = engine.top_up("TARJ-000002", dec!(5)).await.unwrap_err();
        let pos = engine
            .pay("TARJ-000001", dec!(5), 99, None)
            .await
            .unwrap_err();

        assert_eq!(card.kind(), ErrorKind::NotFound);
        assert_eq!(pos.kind(), ErrorKind::NotFound);
        assert!(pos.to_string().contains("Point of sale 99"));
    }

    #[tokio::test]
    async fn test_blocked_is_checked_before_funds() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(5)).await.unwrap();
        engine.pay("TARJ-000001", dec!(5), 2, None).await.unwrap();

        let error = engine
            .pay("TARJ-000001", dec!(100), 2, None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::BlockedCard);
    }

    #[tokio::test]
    async fn test_top_up_above_maximum_balance_is_rejected() {
        let engine = engine_with_card("TARJ-000001").await;
        engine
            .top_up("TARJ-000001", dec!(99999999.00))
            .await
            .unwrap();

        let error = engine.top_up("TARJ-000001", dec!(1.00)).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(
            engine.get_balance("TARJ-000001").await.unwrap(),
            dec!(99999999.00)
        );
    }

    #[tokio::test]
    async fn test_custom_note_is_kept() {
        let engine = engine_with_card("TARJ-000001").await;
        engine.top_up("TARJ-000001", dec!(20)).await.unwrap();

        engine
            .pay("TARJ-000001", dec!(8), 2, Some(" Coffee x2 "))
            .await
            .unwrap();

        let history = engine.get_history("TARJ-000001").await.unwrap();
        assert_eq!(history[0].note, "Coffee x2");
        assert_eq!(history[0].point_of_sale, Some(2));
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable_and_has_no_effect() {
        let engine = LedgerEngine::new(
            LedgerConfig::default().with_lock_timeout(Duration::from_millis(20)),
        );
        engine.register_owner(1, "Ana", None, None).await.unwrap();
        let card = engine.assign_card(1, Some("TARJ-000001")).await.unwrap();

        let held = engine.registry().acquire(&card.number).await.unwrap();
        let error = engine.top_up("TARJ-000001", dec!(5)).await.unwrap_err();
        drop(held);

        assert!(error.is_retryable());
        assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(0));
        assert!(engine.transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_mutation_waiting_for_lock_has_no_effect() {
        let engine = engine_with_card("TARJ-000001").await;
        let number = CardNumber::parse("TARJ-000001").unwrap();

        let held = engine.registry().acquire(&number).await.unwrap();
        let waiting = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.top_up("TARJ-000001", dec!(5)).await })
        };
        tokio::task::yield_now().await;
        waiting.abort();
        let _ = waiting.await;
        drop(held);

        assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(0));
        assert!(engine.transaction_log().is_empty());
        engine.top_up("TARJ-000001", dec!(5)).await.unwrap();
        assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_top_up_is_not_idempotent() {
        let engine = engine_with_card("TARJ-000001").await;

        engine.top_up("TARJ-000001", dec!(10)).await.unwrap();
        engine.top_up("TARJ-000001", dec!(10)).await.unwrap();

        assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(20));
        assert_eq!(engine.get_history("TARJ-000001").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replay_rebuilds_the_same_state() {
        let journal = Arc::new(InMemoryJournal::new());
        let engine = LedgerEngine::with_journal(LedgerConfig::default(), journal.clone());
        engine.register_owner(1, "Ana", None, None).await.unwrap();
        engine.register_owner(2, "Bea", None, None).await.unwrap();
        engine.assign_card(1, Some("TARJ-000001")).await.unwrap();
        engine.top_up("TARJ-000001", dec!(12.50)).await.unwrap();
        engine.pay("TARJ-000001", dec!(12.50), 5, None).await.unwrap();
        engine.assign_card(2, Some("TARJ-000001")).await.unwrap();
        engine.top_up("TARJ-000001", dec!(3)).await.unwrap();

        let restored = LedgerEngine::new(LedgerConfig::default());
        restored.replay(&journal.entries()).await.unwrap();

        assert_eq!(
            restored.registry().cards().await.unwrap(),
            engine.registry().cards().await.unwrap()
        );
        assert_eq!(
            restored.transaction_log().all(),
            engine.transaction_log().all()
        );
        let next = restored.top_up("TARJ-000001", dec!(1)).await.unwrap();
        assert_eq!(next.transaction_id, 4);
    }

    #[tokio::test]
    async fn test_replay_rejects_inconsistent_transaction() {
        let journal = Arc::new(InMemoryJournal::new());
        let engine = LedgerEngine::with_journal(LedgerConfig::default(), journal.clone());
        engine.register_owner(1, "Ana", None, None).await.unwrap();
        engine.assign_card(1, Some("TARJ-000001")).await.unwrap();
        engine.top_up("TARJ-000001", dec!(10)).await.unwrap();

        let mut entries = journal.entries();
        if let Some(JournalEntry::Transaction(tx)) = entries.last_mut() {
            tx.balance_after = dec!(99);
        }

        let restored = LedgerEngine::new(LedgerConfig::default());
        let error = restored.replay(&entries).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Persistence);
    }
}
