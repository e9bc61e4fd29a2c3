//! Durable journal of ledger events
//!
//! Every state change the ledger makes is first written here as a [`JournalEntry`].
//! On restart the entries are replayed in order through the same state machine to
//! rebuild cards, owners and the transaction log.
//!
//! # File format
//!
//! [`CsvJournal`] stores one CSV row per entry. Every row ends with a `seal` column
//! holding `ok`; a trailing row without it was torn by a crash mid-write and is
//! dropped when the journal is reopened. A damaged row anywhere else means the file
//! cannot be trusted and opening fails.

use crate::core::traits::Journal;
use crate::types::{
    CardId, CardNumber, LedgerError, Owner, OwnerId, Transaction, TransactionKind,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Column names of the journal file
pub const JOURNAL_HEADER: [&str; 17] = [
    "event",
    "at",
    "card_id",
    "card_number",
    "owner_id",
    "owner_name",
    "owner_email",
    "owner_phone",
    "reactivated",
    "tx_id",
    "kind",
    "amount",
    "balance_before",
    "balance_after",
    "pos_id",
    "note",
    "seal",
];

const SEAL: &str = "ok";

/// One durable ledger event
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    /// An owner joined the roster
    OwnerRegistered(Owner),

    /// A card was bound to an owner
    ///
    /// `reactivated` marks a BLOCKED card handed out again: its balance resets to
    /// zero and it becomes ACTIVE under the new owner.
    CardAssigned {
        card_id: CardId,
        number: CardNumber,
        owner: OwnerId,
        reactivated: bool,
        at: DateTime<Utc>,
    },

    /// A top-up or payment was committed
    Transaction(Transaction),
}

/// Flat CSV shape of a [`JournalEntry`]
///
/// Decimals are kept as strings so their scale survives the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalRow {
    event: String,
    at: DateTime<Utc>,
    card_id: Option<CardId>,
    card_number: Option<String>,
    owner_id: Option<OwnerId>,
    owner_name: Option<String>,
    owner_email: Option<String>,
    owner_phone: Option<String>,
    reactivated: Option<bool>,
    tx_id: Option<u64>,
    kind: Option<String>,
    amount: Option<String>,
    balance_before: Option<String>,
    balance_after: Option<String>,
    pos_id: Option<u32>,
    note: Option<String>,
    seal: Option<String>,
}

impl JournalRow {
    fn empty(event: &str, at: DateTime<Utc>) -> Self {
        JournalRow {
            event: event.to_string(),
            at,
            card_id: None,
            card_number: None,
            owner_id: None,
            owner_name: None,
            owner_email: None,
            owner_phone: None,
            reactivated: None,
            tx_id: None,
            kind: None,
            amount: None,
            balance_before: None,
            balance_after: None,
            pos_id: None,
            note: None,
            seal: Some(SEAL.to_string()),
        }
    }

    fn from_entry(entry: &JournalEntry) -> Self {
        match entry {
            JournalEntry::OwnerRegistered(owner) => JournalRow {
                owner_id: Some(owner.id),
                owner_name: Some(owner.name.clone()),
                owner_email: owner.email.clone(),
                owner_phone: owner.phone.clone(),
                ..JournalRow::empty("owner", owner.registered_at)
            },
            JournalEntry::CardAssigned {
                card_id,
                number,
                owner,
                reactivated,
                at,
            } => JournalRow {
                card_id: Some(*card_id),
                card_number: Some(number.to_string()),
                owner_id: Some(*owner),
                reactivated: Some(*reactivated),
                ..JournalRow::empty("assign", *at)
            },
            JournalEntry::Transaction(tx) => JournalRow {
                card_id: Some(tx.card_id),
                card_number: Some(tx.card_number.to_string()),
                tx_id: Some(tx.id),
                kind: Some(tx.kind.to_string()),
                amount: Some(tx.amount.to_string()),
                balance_before: Some(tx.balance_before.to_string()),
                balance_after: Some(tx.balance_after.to_string()),
                pos_id: tx.point_of_sale,
                note: Some(tx.note.clone()),
                ..JournalRow::empty("transaction", tx.created_at)
            },
        }
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, LedgerError> {
    value.ok_or_else(|| LedgerError::persistence(format!("journal row is missing '{}'", column)))
}

fn decimal(value: Option<String>, column: &str) -> Result<Decimal, LedgerError> {
    let raw = required(value, column)?;
    Decimal::from_str(&raw).map_err(|_| {
        LedgerError::persistence(format!("journal column '{}' holds '{}'", column, raw))
    })
}

fn card_number(value: Option<String>) -> Result<CardNumber, LedgerError> {
    let raw = required(value, "card_number")?;
    CardNumber::parse(&raw)
        .map_err(|_| LedgerError::persistence(format!("journal holds bad card number '{}'", raw)))
}

impl JournalRow {
    fn into_entry(self) -> Result<JournalEntry, LedgerError> {
        let row = self;

        if row.seal.as_deref() != Some(SEAL) {
            return Err(LedgerError::persistence("journal row is not sealed"));
        }

        match row.event.as_str() {
            "owner" => Ok(JournalEntry::OwnerRegistered(Owner {
                id: required(row.owner_id, "owner_id")?,
                name: required(row.owner_name, "owner_name")?,
                email: row.owner_email,
                phone: row.owner_phone,
                registered_at: row.at,
            })),
            "assign" => Ok(JournalEntry::CardAssigned {
                card_id: required(row.card_id, "card_id")?,
                number: card_number(row.card_number)?,
                owner: required(row.owner_id, "owner_id")?,
                reactivated: row.reactivated.unwrap_or(false),
                at: row.at,
            }),
            "transaction" => {
                let kind = TransactionKind::from_str(&required(row.kind, "kind")?)
                    .map_err(|e| LedgerError::persistence(e.to_string()))?;
                Ok(JournalEntry::Transaction(Transaction {
                    id: required(row.tx_id, "tx_id")?,
                    card_id: required(row.card_id, "card_id")?,
                    card_number: card_number(row.card_number)?,
                    kind,
                    amount: decimal(row.amount, "amount")?,
                    balance_before: decimal(row.balance_before, "balance_before")?,
                    balance_after: decimal(row.balance_after, "balance_after")?,
                    point_of_sale: row.pos_id,
                    note: row.note.unwrap_or_default(),
                    created_at: row.at,
                }))
            }
            other => Err(LedgerError::persistence(format!(
                "unknown journal event '{}'",
                other
            ))),
        }
    }
}

/// Journal kept in memory
///
/// The default for engines that do not need to survive a restart, and the
/// inspection point in tests.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, in order
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Journal for InMemoryJournal {
    fn append(&self, entry: &JournalEntry) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

#[derive(Debug)]
struct JournalFile {
    file: File,
    /// Length of the file up to the last committed row
    len: u64,
}

/// Journal backed by an append-only CSV file
///
/// Each append serializes the row in memory and writes it with a single
/// `write_all`. If the write or the optional `fsync` fails, the file is cut back to
/// its previous length so the failed row never reaches a replay.
#[derive(Debug)]
pub struct CsvJournal {
    path: PathBuf,
    sync: bool,
    file: Mutex<JournalFile>,
}

impl CsvJournal {
    /// Open (or create) a journal file and read back its entries
    ///
    /// A torn trailing row is discarded and cut from the file. The returned
    /// entries are in append order and ready for [`crate::core::LedgerEngine::replay`].
    ///
    /// # Arguments
    ///
    /// * `path` - Journal file location
    /// * `sync` - Whether to `fsync` after every append
    ///
    /// # Errors
    ///
    /// `LedgerError::Persistence` when the file cannot be opened, or a damaged row
    /// is followed by further rows.
    pub fn open(
        path: impl AsRef<Path>,
        sync: bool,
    ) -> Result<(Self, Vec<JournalEntry>), LedgerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                LedgerError::persistence(format!(
                    "cannot open journal {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;

        let (entries, valid_len) = read_entries(&contents)?;

        if valid_len < contents.len() as u64 {
            warn!(
                path = %path.display(),
                discarded_bytes = contents.len() as u64 - valid_len,
                "Discarding torn record at end of journal"
            );
            file.set_len(valid_len)?;
        }

        let mut len = valid_len;
        if len == 0 {
            let header = format!("{}\n", JOURNAL_HEADER.join(","));
            file.write_all(header.as_bytes())?;
            len = header.len() as u64;
        } else if contents.get(len as usize - 1) != Some(&b'\n') {
            file.write_all(b"\n")?;
            len += 1;
        }
        if sync {
            file.sync_data()?;
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Opened journal"
        );

        Ok((
            CsvJournal {
                path,
                sync,
                file: Mutex::new(JournalFile { file, len }),
            },
            entries,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse journal bytes
///
/// Returns the entries and the byte length of the trusted prefix. Anything past
/// that length is a torn trailing record.
fn read_entries(contents: &[u8]) -> Result<(Vec<JournalEntry>, u64), LedgerError> {
    if contents.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_reader(contents);

    let mut record = csv::StringRecord::new();
    let header_ok = match reader.read_record(&mut record) {
        Ok(true) => record.iter().eq(JOURNAL_HEADER.iter().copied()),
        _ => false,
    };
    let header_end = reader.position().byte();

    if !header_ok {
        // A header cut short by a crash is the only row: start the file over
        if header_end >= contents.len() as u64 {
            return Ok((Vec::new(), 0));
        }
        return Err(LedgerError::persistence(
            "journal file does not start with the expected header",
        ));
    }

    let headers = csv::StringRecord::from(JOURNAL_HEADER.to_vec());
    let mut rows: Vec<(u64, Result<JournalEntry, LedgerError>)> = Vec::new();
    loop {
        let start = reader.position().byte();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let entry = record
                    .deserialize::<JournalRow>(Some(&headers))
                    .map_err(LedgerError::from)
                    .and_then(JournalRow::into_entry);
                rows.push((start, entry));
            }
            Err(e) => rows.push((start, Err(LedgerError::from(e)))),
        }
    }

    let last = rows.len().saturating_sub(1);
    let mut entries = Vec::with_capacity(rows.len());
    for (index, (start, row)) in rows.into_iter().enumerate() {
        match row {
            Ok(entry) => entries.push(entry),
            Err(e) if index == last => {
                debug!(error = %e, offset = start, "Torn journal record");
                return Ok((entries, start));
            }
            Err(e) => {
                return Err(LedgerError::persistence(format!(
                    "journal record {} is damaged: {}",
                    index + 1,
                    e
                )))
            }
        }
    }

    Ok((entries, contents.len() as u64))
}

fn serialize_row(entry: &JournalEntry) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(JournalRow::from_entry(entry))?;
    writer
        .into_inner()
        .map_err(|e| LedgerError::persistence(format!("cannot encode journal row: {}", e)))
}

impl Journal for CsvJournal {
    fn append(&self, entry: &JournalEntry) -> Result<(), LedgerError> {
        let bytes = serialize_row(entry)?;

        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = &mut *guard;

        let written = state.file.write_all(&bytes).and_then(|_| {
            if self.sync {
                state.file.sync_data()
            } else {
                Ok(())
            }
        });

        match written {
            Ok(()) => {
                state.len += bytes.len() as u64;
                Ok(())
            }
            Err(write_error) => {
                if let Err(truncate_error) = state.file.set_len(state.len) {
                    error!(
                        path = %self.path.display(),
                        error = %truncate_error,
                        "Failed to roll back partial journal write"
                    );
                    return Err(LedgerError::persistence(format!(
                        "journal write failed ({}) and could not be rolled back ({})",
                        write_error, truncate_error
                    )));
                }
                error!(
                    path = %self.path.display(),
                    error = %write_error,
                    "Journal write failed"
                );
                Err(LedgerError::from(write_error))
            }
        }
    }
}
