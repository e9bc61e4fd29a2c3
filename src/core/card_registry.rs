//! Card identity, lifecycle and owner roster
//!
//! This module provides the [`CardRegistry`], which hands out cards to owners,
//! resolves card numbers and ids, and guards every card behind its own async mutex.
//!
//! # Design
//!
//! Each card lives in an `Arc<tokio::sync::Mutex<Card>>` stored in a `DashMap`
//! keyed by card number. The ledger engine takes that mutex for the whole
//! validate, journal, mutate and append sequence of a balance change, so two
//! mutations of the same card never interleave while different cards proceed in
//! parallel.
//!
//! Registry-wide changes (new owners, card assignment) are serialized by a single
//! assignment lock. When both are needed the assignment lock is taken first, then
//! the card lock.
//!
//! # Thread Safety
//!
//! `DashMap` references are never held across an `.await`: handles are cloned out
//! of the map before any lock is awaited.

use crate::core::config::LedgerConfig;
use crate::core::journal::JournalEntry;
use crate::core::traits::{Clock, Journal};
use crate::types::{
    Card, CardId, CardNumber, CardVerification, Entity, LedgerError, Owner, OwnerId,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Shared handle to one card's state and lock
pub(crate) type CardHandle = Arc<AsyncMutex<Card>>;

/// Range the six generated digits are drawn from
const GENERATED_DIGITS: RangeInclusive<u32> = 100_000..=999_999;

/// Attempts at drawing an unused number before giving up
const MAX_GENERATION_ATTEMPTS: usize = 64;

/// Registry of cards and their owners
#[derive(Debug)]
pub struct CardRegistry {
    /// Every card ever created, by number
    cards: DashMap<CardNumber, CardHandle>,

    /// Card number by registry id
    numbers_by_id: DashMap<CardId, CardNumber>,

    /// Owner roster
    owners: DashMap<OwnerId, Owner>,

    /// Card currently bound to each owner
    bindings: DashMap<OwnerId, CardNumber>,

    /// Serializes owner registration and card assignment
    assignment: AsyncMutex<()>,

    next_card_id: AtomicU64,

    generator: Mutex<StdRng>,

    journal: Arc<dyn Journal>,

    clock: Arc<dyn Clock>,

    lock_timeout: Duration,
}

impl CardRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    ///
    /// * `config` - Lock timeout and card number seed
    /// * `journal` - Where owner registrations and assignments are committed
    /// * `clock` - Source of registration and creation timestamps
    pub fn new(config: &LedgerConfig, journal: Arc<dyn Journal>, clock: Arc<dyn Clock>) -> Self {
        let generator = match config.card_number_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            cards: DashMap::new(),
            numbers_by_id: DashMap::new(),
            owners: DashMap::new(),
            bindings: DashMap::new(),
            assignment: AsyncMutex::new(()),
            next_card_id: AtomicU64::new(1),
            generator: Mutex::new(generator),
            journal,
            clock,
            lock_timeout: config.lock_timeout,
        }
    }

    async fn lock_assignment(&self) -> Result<MutexGuard<'_, ()>, LedgerError> {
        tokio::time::timeout(self.lock_timeout, self.assignment.lock())
            .await
            .map_err(|_| {
                warn!(
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Card assignment lock not acquired in time"
                );
                LedgerError::retryable(format!(
                    "card assignment is busy; lock not acquired within {}ms",
                    self.lock_timeout.as_millis()
                ))
            })
    }

    /// Add an owner to the roster
    ///
    /// Blank email and phone values are stored as absent.
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` if the name is blank
    /// * `LedgerError::Conflict` if the id is already registered
    /// * `LedgerError::Retryable` / `LedgerError::Persistence` from the journal
    pub async fn register_owner(
        &self,
        id: OwnerId,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Owner, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation(format!(
                "owner {} needs a name",
                id
            )));
        }

        let _assignment = self.lock_assignment().await?;

        if self.owners.contains_key(&id) {
            return Err(LedgerError::conflict(format!(
                "owner {} is already registered",
                id
            )));
        }

        let owner = Owner {
            id,
            name: name.to_string(),
            email: non_blank(email),
            phone: non_blank(phone),
            registered_at: self.clock.now(),
        };
        self.journal
            .append(&JournalEntry::OwnerRegistered(owner.clone()))?;
        self.owners.insert(id, owner.clone());

        info!(owner = id, "Registered owner");
        Ok(owner)
    }

    /// Look up an owner by id
    pub fn owner(&self, id: OwnerId) -> Result<Owner, LedgerError> {
        self.owners
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found(Entity::Owner, id))
    }

    /// Owners still waiting for a card, sorted by name
    pub fn owners_without_card(&self) -> Vec<Owner> {
        let mut waiting: Vec<Owner> = self
            .owners
            .iter()
            .filter(|entry| !self.bindings.contains_key(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        waiting.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        waiting
    }

    /// Assign a card to an owner
    ///
    /// Without a requested number a fresh `TARJ-NNNNNN` number is generated. With
    /// one, a BLOCKED card carrying that number is reactivated for the owner (ACTIVE,
    /// balance zero), and an unknown number creates a new card.
    ///
    /// # Arguments
    ///
    /// * `owner` - Registered owner receiving the card
    /// * `requested` - Card number to hand out, trimmed and upper-cased before use
    ///
    /// # Returns
    ///
    /// The card as assigned
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` if the requested number is malformed
    /// * `LedgerError::NotFound` if the owner is not registered
    /// * `LedgerError::Conflict` if the requested card is ACTIVE, or the owner
    ///   already holds a different card, ACTIVE or BLOCKED
    /// * `LedgerError::Retryable` if no unused number could be generated or a lock
    ///   timed out
    pub async fn assign(
        &self,
        owner: OwnerId,
        requested: Option<&str>,
    ) -> Result<Card, LedgerError> {
        let requested = requested.map(CardNumber::parse).transpose()?;

        let _assignment = self.lock_assignment().await?;

        if !self.owners.contains_key(&owner) {
            return Err(LedgerError::not_found(Entity::Owner, owner));
        }

        let existing = requested.as_ref().and_then(|number| self.handle(number));
        if let (Some(number), Some(handle)) = (requested.as_ref(), existing) {
            let mut card = self.lock_card(number, handle).await?;
            Self::check_reactivation(&card, owner)?;
            self.ensure_unbound(owner, Some(number)).await?;
            return self.reactivate(&mut card, owner);
        }

        self.ensure_unbound(owner, None).await?;
        let number = match requested {
            Some(number) => number,
            None => self.generate_number()?,
        };
        self.create(owner, number)
    }

    fn reactivate(&self, card: &mut Card, owner: OwnerId) -> Result<Card, LedgerError> {
        let at = self.clock.now();
        self.journal.append(&JournalEntry::CardAssigned {
            card_id: card.id,
            number: card.number.clone(),
            owner,
            reactivated: true,
            at,
        })?;

        let previous_owner = card.owner;
        card.reactivate(owner);
        self.rebind(previous_owner, owner, &card.number);

        info!(
            card = %card.number,
            owner,
            previous_owner,
            "Reactivated blocked card"
        );
        Ok(card.clone())
    }

    fn create(&self, owner: OwnerId, number: CardNumber) -> Result<Card, LedgerError> {
        let id = self.next_card_id.fetch_add(1, Ordering::SeqCst);
        let card = Card::new(id, number, owner, self.clock.now());

        self.journal.append(&JournalEntry::CardAssigned {
            card_id: card.id,
            number: card.number.clone(),
            owner,
            reactivated: false,
            at: card.created_at,
        })?;
        self.insert(card.clone());

        info!(card = %card.number, card_id = id, owner, "Assigned new card");
        Ok(card)
    }

    /// An ACTIVE card cannot change hands
    fn check_reactivation(card: &Card, owner: OwnerId) -> Result<(), LedgerError> {
        if card.is_active() {
            let holder = if card.owner == owner {
                "this owner"
            } else {
                "another owner"
            };
            return Err(LedgerError::conflict(format!(
                "card {} is already assigned to {}",
                card.number, holder
            )));
        }
        Ok(())
    }

    /// Reject an owner still bound to a card other than `except`
    ///
    /// A BLOCKED card stays bound to its owner, since a later top-up makes it
    /// ACTIVE again. Called with the assignment lock held.
    async fn ensure_unbound(
        &self,
        owner: OwnerId,
        except: Option<&CardNumber>,
    ) -> Result<(), LedgerError> {
        let held = match self.binding(owner) {
            Some(held) if Some(&held) != except => held,
            _ => return Ok(()),
        };

        let state = match self.handle(&held) {
            Some(handle) => {
                if self.lock_card(&held, handle).await?.is_active() {
                    "active"
                } else {
                    "blocked"
                }
            }
            None => "a",
        };
        Err(LedgerError::conflict(format!(
            "owner {} already holds {} card {}",
            owner, state, held
        )))
    }

    fn binding(&self, owner: OwnerId) -> Option<CardNumber> {
        self.bindings.get(&owner).map(|entry| entry.value().clone())
    }

    fn rebind(&self, previous_owner: OwnerId, owner: OwnerId, number: &CardNumber) {
        self.bindings
            .remove_if(&previous_owner, |_, bound| bound == number);
        self.bindings.insert(owner, number.clone());
    }

    fn insert(&self, card: Card) {
        self.numbers_by_id.insert(card.id, card.number.clone());
        self.bindings.insert(card.owner, card.number.clone());
        self.cards
            .insert(card.number.clone(), Arc::new(AsyncMutex::new(card)));
    }

    /// Draw numbers until one is unused
    ///
    /// Runs under the assignment lock, the only place new numbers enter the map.
    fn generate_number(&self) -> Result<CardNumber, LedgerError> {
        let mut generator = self
            .generator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = CardNumber::from_digits(generator.gen_range(GENERATED_DIGITS));
            if !self.cards.contains_key(&candidate) {
                debug!(card = %candidate, attempt, "Generated card number");
                return Ok(candidate);
            }
        }

        Err(LedgerError::retryable(format!(
            "no unused card number found after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }

    /// Snapshot of a card by number
    ///
    /// Waits for any in-flight mutation of the card, so the snapshot only reflects
    /// committed state.
    pub async fn lookup_by_number(&self, number: &str) -> Result<Card, LedgerError> {
        let number = CardNumber::parse(number)?;
        self.snapshot(&number).await
    }

    /// Snapshot of a card by registry id
    pub async fn lookup_by_id(&self, id: CardId) -> Result<Card, LedgerError> {
        let number = self
            .numbers_by_id
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found(Entity::Card, id))?;
        self.snapshot(&number).await
    }

    /// Existence and assignment status of a card number
    ///
    /// An unknown number is reported with `exists == false`, not as an error.
    pub async fn status(&self, number: &str) -> Result<CardVerification, LedgerError> {
        let number = CardNumber::parse(number)?;
        let handle = match self.handle(&number) {
            Some(handle) => handle,
            None => return Ok(CardVerification::unknown(number)),
        };
        let card = self.lock_card(&number, handle).await?.clone();
        let owner_name = self.owner(card.owner).ok().map(|owner| owner.name);
        let active = card.is_active();

        Ok(CardVerification {
            number: card.number,
            exists: true,
            active,
            assigned_owner: Some(card.owner),
            owner_name,
        })
    }

    /// Snapshot of every card, sorted by number
    pub async fn cards(&self) -> Result<Vec<Card>, LedgerError> {
        let mut handles: Vec<(CardNumber, CardHandle)> = self
            .cards
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        let mut cards = Vec::with_capacity(handles.len());
        for (number, handle) in handles {
            cards.push(self.lock_card(&number, handle).await?.clone());
        }
        Ok(cards)
    }

    pub fn contains(&self, number: &CardNumber) -> bool {
        self.cards.contains_key(number)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    async fn snapshot(&self, number: &CardNumber) -> Result<Card, LedgerError> {
        let handle = self
            .handle(number)
            .ok_or_else(|| LedgerError::card_not_found(number))?;
        Ok(self.lock_card(number, handle).await?.clone())
    }

    pub(crate) fn handle(&self, number: &CardNumber) -> Option<CardHandle> {
        self.cards.get(number).map(|entry| Arc::clone(entry.value()))
    }

    /// Take the exclusive lock of a card, waiting at most the lock timeout
    ///
    /// # Errors
    ///
    /// * `LedgerError::NotFound` if the card does not exist
    /// * `LedgerError::Retryable` if the lock was not acquired in time
    pub(crate) async fn acquire(
        &self,
        number: &CardNumber,
    ) -> Result<OwnedMutexGuard<Card>, LedgerError> {
        let handle = self
            .handle(number)
            .ok_or_else(|| LedgerError::card_not_found(number))?;
        self.lock_card(number, handle).await
    }

    async fn lock_card(
        &self,
        number: &CardNumber,
        handle: CardHandle,
    ) -> Result<OwnedMutexGuard<Card>, LedgerError> {
        tokio::time::timeout(self.lock_timeout, handle.lock_owned())
            .await
            .map_err(|_| {
                warn!(
                    card = %number,
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Card lock not acquired in time"
                );
                LedgerError::lock_timeout(number, self.lock_timeout)
            })
    }

    /// Re-add an owner read back from the journal
    pub(crate) async fn restore_owner(&self, owner: Owner) -> Result<(), LedgerError> {
        let _assignment = self.lock_assignment().await?;
        if self.owners.contains_key(&owner.id) {
            return Err(LedgerError::persistence(format!(
                "journal registers owner {} twice",
                owner.id
            )));
        }
        self.owners.insert(owner.id, owner);
        Ok(())
    }

    /// Re-apply an assignment read back from the journal
    pub(crate) async fn restore_assignment(
        &self,
        card_id: CardId,
        number: CardNumber,
        owner: OwnerId,
        reactivated: bool,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let _assignment = self.lock_assignment().await?;
        let replay_error = |e: LedgerError| {
            LedgerError::persistence(format!(
                "journal assignment of card {} to owner {} does not apply: {}",
                number, owner, e
            ))
        };

        if !self.owners.contains_key(&owner) {
            return Err(replay_error(LedgerError::not_found(Entity::Owner, owner)));
        }

        if reactivated {
            let handle = self
                .handle(&number)
                .ok_or_else(|| replay_error(LedgerError::card_not_found(&number)))?;
            let mut card = self.lock_card(&number, handle).await?;
            Self::check_reactivation(&card, owner).map_err(replay_error)?;
            let previous_owner = card.owner;
            card.reactivate(owner);
            self.rebind(previous_owner, owner, &number);
        } else {
            if self.contains(&number) || self.numbers_by_id.contains_key(&card_id) {
                return Err(replay_error(LedgerError::conflict(format!(
                    "card {} already exists",
                    number
                ))));
            }
            self.ensure_unbound(owner, None).await.map_err(replay_error)?;
            self.next_card_id
                .fetch_max(card_id.saturating_add(1), Ordering::SeqCst);
            self.insert(Card::new(card_id, number, owner, at));
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::journal::InMemoryJournal;
    use crate::core::traits::SystemClock;
    use crate::types::CardStatus;
    use rstest::rstest;

    fn registry() -> CardRegistry {
        CardRegistry::new(
            &LedgerConfig::default().with_seed(7),
            Arc::new(InMemoryJournal::new()),
            Arc::new(SystemClock),
        )
    }

    async fn registry_with_owners(ids: &[OwnerId]) -> CardRegistry {
        let registry = registry();
        for id in ids {
            registry
                .register_owner(*id, &format!("Owner {}", id), None, None)
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_generated_number_has_six_digits_in_range() {
        let registry = registry_with_owners(&[1]).await;

        let card = registry.assign(1, None).await.unwrap();

        let digits: u32 = card.number.as_str()[5..].parse().unwrap();
        assert!(GENERATED_DIGITS.contains(&digits));
        assert_eq!(card.status, CardStatus::Active);
        assert_eq!(card.balance, rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_requested_number_is_normalised() {
        let registry = registry_with_owners(&[1]).await;

        let card = registry.assign(1, Some(" tarj-000123 ")).await.unwrap();

        assert_eq!(card.number.as_str(), "TARJ-000123");
        assert_eq!(
            registry.lookup_by_number("TARJ-000123").await.unwrap(),
            card
        );
        assert_eq!(registry.lookup_by_id(card.id).await.unwrap(), card);
    }

    #[rstest]
    #[case::same_owner(1, "this owner")]
    #[case::other_owner(2, "another owner")]
    #[tokio::test]
    async fn test_active_card_cannot_be_reassigned(
        #[case] requester: OwnerId,
        #[case] expected: &str,
    ) {
        let registry = registry_with_owners(&[1, 2]).await;
        registry.assign(1, Some("TARJ-000001")).await.unwrap();

        let error = registry
            .assign(requester, Some("TARJ-000001"))
            .await
            .unwrap_err();

        assert!(matches!(error, LedgerError::Conflict { .. }));
        assert!(error.to_string().contains(expected));
    }

    #[tokio::test]
    async fn test_owner_holds_at_most_one_card() {
        let registry = registry_with_owners(&[1]).await;
        registry.assign(1, Some("TARJ-000001")).await.unwrap();

        let error = registry.assign(1, None).await.unwrap_err();

        assert!(matches!(error, LedgerError::Conflict { .. }));
        assert!(error
            .to_string()
            .contains("owner 1 already holds active card TARJ-000001"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_card_stays_bound_to_its_owner() {
        let registry = registry_with_owners(&[1]).await;
        let card = registry.assign(1, Some("TARJ-000001")).await.unwrap();
        {
            let mut guard = registry.acquire(&card.number).await.unwrap();
            guard.status = CardStatus::Blocked;
        }

        let status = registry.status("TARJ-000001").await.unwrap();
        assert!(status.exists && !status.active);
        assert_eq!(status.assigned_owner, Some(1));

        let error = registry.assign(1, Some("TARJ-000002")).await.unwrap_err();
        assert!(matches!(error, LedgerError::Conflict { .. }));
        assert!(error
            .to_string()
            .contains("owner 1 already holds blocked card TARJ-000001"));
        assert_eq!(registry.len(), 1);

        // The owner may take the same card back
        let reactivated = registry.assign(1, Some("TARJ-000001")).await.unwrap();
        assert_eq!(reactivated.status, CardStatus::Active);
    }

    #[tokio::test]
    async fn test_blocked_card_is_reactivated_for_new_owner() {
        let registry = registry_with_owners(&[1, 2]).await;
        let card = registry.assign(1, Some("TARJ-000001")).await.unwrap();
        {
            let mut guard = registry.acquire(&card.number).await.unwrap();
            guard.status = CardStatus::Blocked;
        }

        let reassigned = registry.assign(2, Some("TARJ-000001")).await.unwrap();

        assert_eq!(reassigned.id, card.id);
        assert_eq!(reassigned.owner, 2);
        assert_eq!(reassigned.status, CardStatus::Active);
        let waiting: Vec<OwnerId> = registry
            .owners_without_card()
            .iter()
            .map(|owner| owner.id)
            .collect();
        assert_eq!(waiting, vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_owner_and_malformed_number() {
        let registry = registry_with_owners(&[1]).await;

        assert!(matches!(
            registry.assign(9, None).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            registry.assign(1, Some("TARJ-12")).await,
            Err(LedgerError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_of_unknown_number_is_not_an_error() {
        let registry = registry_with_owners(&[1]).await;
        registry.assign(1, Some("TARJ-000001")).await.unwrap();

        let unknown = registry.status("TARJ-999999").await.unwrap();
        assert!(!unknown.exists);

        let known = registry.status("tarj-000001").await.unwrap();
        assert!(known.exists && known.active);
        assert_eq!(known.assigned_owner, Some(1));
        assert_eq!(known.owner_name.as_deref(), Some("Owner 1"));

        assert!(registry.status("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_register_owner_validation() {
        let registry = registry_with_owners(&[1]).await;

        assert!(matches!(
            registry.register_owner(1, "Again", None, None).await,
            Err(LedgerError::Conflict { .. })
        ));
        assert!(matches!(
            registry.register_owner(2, "   ", None, None).await,
            Err(LedgerError::Validation { .. })
        ));

        let owner = registry
            .register_owner(3, " Bea ", Some(" "), Some("555-0100"))
            .await
            .unwrap();
        assert_eq!(owner.name, "Bea");
        assert_eq!(owner.email, None);
        assert_eq!(owner.phone.as_deref(), Some("555-0100"));
    }

    #[tokio::test]
    async fn test_same_seed_generates_same_numbers() {
        let first = registry_with_owners(&[1]).await;
        let second = registry_with_owners(&[1]).await;

        assert_eq!(
            first.assign(1, None).await.unwrap().number,
            second.assign(1, None).await.unwrap().number
        );
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable() {
        let registry = CardRegistry::new(
            &LedgerConfig::default().with_lock_timeout(Duration::from_millis(20)),
            Arc::new(InMemoryJournal::new()),
            Arc::new(SystemClock),
        );
        registry.register_owner(1, "Ana", None, None).await.unwrap();
        let card = registry.assign(1, Some("TARJ-000001")).await.unwrap();

        let _held = registry.acquire(&card.number).await.unwrap();
        let error = registry.acquire(&card.number).await.unwrap_err();

        assert!(error.is_retryable());
    }
}
