//! Restart and crash recovery through the CSV journal

use event_card_ledger::core::{CsvJournal, LedgerConfig, LedgerEngine};
use event_card_ledger::types::{CardStatus, ErrorKind};
use rust_decimal_macros::dec;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Open the journal at `path` and rebuild an engine from it
async fn open(path: &Path) -> LedgerEngine {
    let (journal, entries) = CsvJournal::open(path, false).unwrap();
    let engine = LedgerEngine::with_journal(LedgerConfig::default(), Arc::new(journal));
    engine.replay(&entries).await.unwrap();
    engine
}

async fn populate(path: &Path) {
    let engine = open(path).await;
    engine
        .register_owner(1, "Ana", Some("ana@example.com"), None)
        .await
        .unwrap();
    engine.register_owner(2, "Bruno", None, None).await.unwrap();
    engine.assign_card(1, Some("TARJ-000001")).await.unwrap();
    engine.top_up("TARJ-000001", dec!(40)).await.unwrap();
    engine
        .pay("TARJ-000001", dec!(40), 2, Some("Coffee x4"))
        .await
        .unwrap();
    engine.top_up("TARJ-000001", dec!(12.50)).await.unwrap();
}

#[tokio::test]
async fn restart_restores_cards_owners_and_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.csv");
    populate(&path).await;

    let engine = open(&path).await;

    let card = engine.registry().lookup_by_number("TARJ-000001").await.unwrap();
    assert_eq!(card.balance, dec!(12.50));
    assert_eq!(card.status, CardStatus::Active);
    assert_eq!(card.owner, 1);

    let owner = engine.registry().owner(1).unwrap();
    assert_eq!(owner.email.as_deref(), Some("ana@example.com"));
    let idle: Vec<u32> = engine
        .registry()
        .owners_without_card()
        .iter()
        .map(|owner| owner.id)
        .collect();
    assert_eq!(idle, vec![2]);

    let history = engine.get_history("TARJ-000001").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].note, "Coffee x4");
    assert_eq!(history[1].point_of_sale, Some(2));

    // Ids continue after the replayed ones
    let receipt = engine.top_up("TARJ-000001", dec!(1)).await.unwrap();
    assert_eq!(receipt.transaction_id, 4);
}

#[tokio::test]
async fn torn_trailing_record_is_discarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.csv");
    populate(&path).await;
    let committed_len = fs::metadata(&path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"transaction,2026-10-19T10:00:00Z,1,TARJ-000001,,,,,,5,PAYMENT,9.00")
        .unwrap();
    drop(file);

    let engine = open(&path).await;
    assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
    assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(12.50));

    // The file keeps accepting appends after the cut
    engine.pay("TARJ-000001", dec!(2.50), 1, None).await.unwrap();
    drop(engine);
    let engine = open(&path).await;
    assert_eq!(engine.get_balance("TARJ-000001").await.unwrap(), dec!(10.00));
}

#[tokio::test]
async fn damaged_record_before_the_tail_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.csv");
    populate(&path).await;

    let contents = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.insert(3, "transaction,not,a,journal,row");
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let err = CsvJournal::open(&path, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);
}

#[tokio::test]
async fn blocked_card_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.csv");

    let engine = open(&path).await;
    engine.register_owner(1, "Ana", None, None).await.unwrap();
    engine.register_owner(2, "Bruno", None, None).await.unwrap();
    engine.assign_card(1, Some("TARJ-000007")).await.unwrap();
    engine.top_up("TARJ-000007", dec!(5)).await.unwrap();
    engine.pay("TARJ-000007", dec!(5), 1, None).await.unwrap();
    drop(engine);

    let engine = open(&path).await;
    let err = engine.pay("TARJ-000007", dec!(1), 1, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BlockedCard);

    // A reassignment journaled after the restart replays too
    engine.assign_card(2, Some("TARJ-000007")).await.unwrap();
    drop(engine);

    let engine = open(&path).await;
    let card = engine.registry().lookup_by_number("TARJ-000007").await.unwrap();
    assert_eq!(card.owner, 2);
    assert_eq!(card.status, CardStatus::Active);
    assert_eq!(card.balance, dec!(0));
}
