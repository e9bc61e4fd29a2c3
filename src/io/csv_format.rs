//! CSV format handling for ledger commands and report output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CommandRecord structure for deserialization
//! - Conversion from CSV records to ledger commands
//! - Report serialization (balances, sales, transactions, history)
//! - Points-of-sale catalog loading
//!
//! Apart from `read_points_of_sale`, all functions are pure (no file I/O) for easy
//! testing.

use crate::core::report::{SalesSummary, TransactionsReport};
use crate::types::{Card, LedgerCommand, OwnerId, PointOfSale, PosId, Transaction};
use chrono::SecondsFormat;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// CSV record structure for deserialization
///
/// Matches the input CSV format with columns: op, card, owner, pos, amount, text.
/// `email` and `phone` are optional extra columns used by `owner` rows. Every
/// field but `op` may be empty; which ones are required depends on the operation.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct CommandRecord {
    pub op: String,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub pos: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, column: &str, op: &str) -> Result<String, String> {
    present(value).ok_or_else(|| format!("'{}' operation requires the '{}' column", op, column))
}

fn parse_id<T: FromStr>(raw: String, column: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("Invalid {} '{}'", column, raw))
}

fn parse_amount(raw: String) -> Result<Decimal, String> {
    Decimal::from_str(&raw).map_err(|_| format!("Invalid amount '{}'", raw))
}

/// Convert a CommandRecord to a LedgerCommand
///
/// This function:
/// - Parses the operation name (case-insensitive)
/// - Checks the columns the operation needs are present
/// - Parses ids and amounts
///
/// Amount range and card number format are left to the ledger, which reports them
/// as validation errors.
///
/// # Arguments
///
/// * `record` - The deserialized CSV record
///
/// # Returns
///
/// Result containing either:
/// - Ok(LedgerCommand) - Successfully converted record
/// - Err(String) - Error message describing the conversion failure
pub fn convert_command_record(record: CommandRecord) -> Result<LedgerCommand, String> {
    let op = record.op.trim().to_lowercase();

    match op.as_str() {
        "owner" | "register" => Ok(LedgerCommand::RegisterOwner {
            owner: parse_id::<OwnerId>(required(record.owner, "owner", &op)?, "owner")?,
            name: required(record.text, "text", &op)?,
            email: present(record.email),
            phone: present(record.phone),
        }),
        "assign" => Ok(LedgerCommand::Assign {
            owner: parse_id::<OwnerId>(required(record.owner, "owner", &op)?, "owner")?,
            card: present(record.card),
        }),
        "topup" | "top_up" => Ok(LedgerCommand::TopUp {
            card: required(record.card, "card", &op)?,
            amount: parse_amount(required(record.amount, "amount", &op)?)?,
        }),
        "pay" | "payment" => Ok(LedgerCommand::Pay {
            card: required(record.card, "card", &op)?,
            amount: parse_amount(required(record.amount, "amount", &op)?)?,
            pos: parse_id::<PosId>(required(record.pos, "pos", &op)?, "pos")?,
            note: present(record.text),
        }),
        _ => Err(format!("Invalid operation: '{}'", record.op)),
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

/// Write card states to CSV format
///
/// Writes cards with columns: card, owner, balance, status.
/// Cards are sorted by number for deterministic output.
///
/// # Arguments
///
/// * `cards` - Card snapshots to write
/// * `output` - Writer receiving the CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_cards_csv(cards: &[Card], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["card", "owner", "balance", "status"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = cards.to_vec();
    sorted.sort_by(|a, b| a.number.cmp(&b.number));

    for card in sorted {
        writer
            .write_record(&[
                card.number.to_string(),
                card.owner.to_string(),
                money(card.balance),
                card.status.to_string(),
            ])
            .map_err(|e| format!("Failed to write card record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write a sales summary to CSV format
///
/// Columns: group, key, name, count, total, average. The first row (`all`) holds
/// the overall totals, followed by one `point_of_sale` row per outlet and one
/// `item` row per top item (count is the quantity, average the unit price).
pub fn write_sales_summary_csv(
    summary: &SalesSummary,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["group", "key", "name", "count", "total", "average"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let average = |total: Decimal, count: u64| {
        if count == 0 {
            Decimal::ZERO
        } else {
            (total / Decimal::from(count)).round_dp(2)
        }
    };

    let mut rows = vec![[
        "all".to_string(),
        String::new(),
        String::new(),
        summary.count.to_string(),
        money(summary.total),
        money(summary.average),
    ]];
    rows.extend(summary.per_point_of_sale.iter().map(|pos| {
        [
            "point_of_sale".to_string(),
            pos.point_of_sale.to_string(),
            pos.name.clone(),
            pos.count.to_string(),
            money(pos.total),
            money(average(pos.total, pos.count)),
        ]
    }));
    rows.extend(summary.top_items.iter().map(|item| {
        [
            "item".to_string(),
            String::new(),
            item.name.clone(),
            item.quantity.to_string(),
            money(item.total),
            money(average(item.total, item.quantity)),
        ]
    }));

    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| format!("Failed to write summary record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write an audited transactions report to CSV format
///
/// Columns: id, created_at, card, kind, amount, balance_before, balance_after,
/// point_of_sale, note, audit. Only the last four digits of each card are written.
pub fn write_transactions_csv(
    report: &TransactionsReport,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = Writer::from_writer(output);

    writer
        .write_record([
            "id",
            "created_at",
            "card",
            "kind",
            "amount",
            "balance_before",
            "balance_after",
            "point_of_sale",
            "note",
            "audit",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for entry in &report.entries {
        let tx = &entry.transaction;
        writer
            .write_record(&[
                tx.id.to_string(),
                tx.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                entry.card_last_four.clone(),
                tx.kind.to_string(),
                money(tx.amount),
                money(tx.balance_before),
                money(tx.balance_after),
                entry.point_of_sale_name.clone().unwrap_or_default(),
                tx.note.clone(),
                entry.audit.to_string(),
            ])
            .map_err(|e| format!("Failed to write transaction record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write one card's history (most recent first) to CSV format
///
/// Columns: id, created_at, kind, amount, balance_before, balance_after,
/// point_of_sale, note.
pub fn write_history_csv(history: &[Transaction], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = Writer::from_writer(output);

    writer
        .write_record([
            "id",
            "created_at",
            "kind",
            "amount",
            "balance_before",
            "balance_after",
            "point_of_sale",
            "note",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for tx in history {
        writer
            .write_record(&[
                tx.id.to_string(),
                tx.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                tx.kind.to_string(),
                money(tx.amount),
                money(tx.balance_before),
                money(tx.balance_after),
                tx.point_of_sale.map(|id| id.to_string()).unwrap_or_default(),
                tx.note.clone(),
            ])
            .map_err(|e| format!("Failed to write transaction record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Load a points-of-sale catalog
///
/// Columns: id, name, category, active (`active` may be omitted and defaults to
/// true).
pub fn read_points_of_sale(path: &Path) -> Result<Vec<PointOfSale>, String> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

    reader
        .deserialize::<PointOfSale>()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|e| format!("Line {}: invalid point of sale: {}", index + 2, e))
        })
        .collect()
}
