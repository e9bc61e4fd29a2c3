//! Read-only report views over the transaction log
//!
//! Reports never change ledger state. They take a snapshot of the log and derive
//! sales totals, per-point-of-sale breakdowns, best-selling items and an audited
//! transaction listing from it.

use crate::core::point_of_sale::PointOfSaleDirectory;
use crate::core::transaction_log::TransactionLog;
use crate::types::{LedgerError, PosId, Transaction, TransactionKind, AMOUNT_SCALE};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How many items the sales summary ranks
pub const TOP_ITEMS: usize = 10;

/// Inclusive range of UTC calendar dates; open ends match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl DateRange {
    /// # Errors
    ///
    /// `LedgerError::Validation` if `from` is after `to`
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self, LedgerError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(LedgerError::validation(format!(
                    "date range starts on {} after it ends on {}",
                    from, to
                )));
            }
        }
        Ok(Self { from, to })
    }

    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, LedgerError> {
        Self::new(parse_date(from)?, parse_date(to)?)
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        let date = at.date_naive();
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, LedgerError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                LedgerError::validation(format!("date '{}' is not in YYYY-MM-DD format", raw))
            }),
    }
}

/// Sales of one point of sale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosSales {
    pub point_of_sale: PosId,
    pub name: String,
    pub count: u64,
    pub total: Decimal,
}

/// Units and revenue of one item parsed from payment descriptions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSales {
    pub name: String,
    pub quantity: u64,
    pub total: Decimal,
}

/// Aggregated payments over a date range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub count: u64,
    pub total: Decimal,
    pub average: Decimal,
    /// Sorted by total, highest first
    pub per_point_of_sale: Vec<PosSales>,
    /// At most [`TOP_ITEMS`] entries, highest quantity first
    pub top_items: Vec<ItemSales>,
}

/// Whether the card could cover a recorded payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAudit {
    Successful,
    InsufficientBalance,
}

impl PaymentAudit {
    fn of(tx: &Transaction) -> Self {
        match tx.kind {
            TransactionKind::TopUp => PaymentAudit::Successful,
            TransactionKind::Payment if tx.balance_before >= tx.amount => {
                PaymentAudit::Successful
            }
            TransactionKind::Payment => PaymentAudit::InsufficientBalance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAudit::Successful => "successful",
            PaymentAudit::InsufficientBalance => "insufficient_balance",
        }
    }
}

impl fmt::Display for PaymentAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the transactions report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub transaction: Transaction,
    pub card_last_four: String,
    pub point_of_sale_name: Option<String>,
    pub audit: PaymentAudit,
}

/// Filtered transactions with their totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionsReport {
    /// Most recent first
    pub entries: Vec<ReportEntry>,
    pub top_up_count: u64,
    pub top_up_total: Decimal,
    pub payment_count: u64,
    pub payment_total: Decimal,
    /// Top-up total minus payment total
    pub net: Decimal,
}

/// Builds report views from the transaction log
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    log: Arc<TransactionLog>,
    points_of_sale: Arc<PointOfSaleDirectory>,
}

impl ReportAggregator {
    pub fn new(log: Arc<TransactionLog>, points_of_sale: Arc<PointOfSaleDirectory>) -> Self {
        Self {
            log,
            points_of_sale,
        }
    }

    fn pos_name(&self, id: PosId) -> String {
        self.points_of_sale
            .get(id)
            .map(|pos| pos.name)
            .unwrap_or_else(|_| format!("Point of sale {}", id))
    }

    /// Totals over payments in `range`, optionally limited to one point of sale
    ///
    /// An unknown point of sale gives an empty summary.
    pub fn sales_summary(&self, range: &DateRange, pos: Option<PosId>) -> SalesSummary {
        let payments: Vec<Transaction> = self
            .log
            .all()
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::Payment && range.contains(&tx.created_at))
            .filter(|tx| pos.map_or(true, |pos| tx.point_of_sale == Some(pos)))
            .collect();

        let count = payments.len() as u64;
        let total: Decimal = payments.iter().map(|tx| tx.amount).sum();
        let average = if count == 0 {
            Decimal::ZERO
        } else {
            (total / Decimal::from(count)).round_dp(AMOUNT_SCALE)
        };

        let mut per_pos: HashMap<PosId, (u64, Decimal)> = HashMap::new();
        let mut items: HashMap<String, (u64, Decimal)> = HashMap::new();
        for tx in &payments {
            if let Some(id) = tx.point_of_sale {
                let slot = per_pos.entry(id).or_insert((0, Decimal::ZERO));
                slot.0 += 1;
                slot.1 += tx.amount;
            }

            let parsed = parse_items(&tx.note);
            // A note whose quantities overflow counts as a note without items
            let units = parsed
                .iter()
                .try_fold(0u64, |units, (_, quantity)| units.checked_add(*quantity));
            let units = match units {
                Some(units) if units > 0 => units,
                _ => continue,
            };
            let unit_price = tx.amount / Decimal::from(units);
            for (name, quantity) in parsed {
                let slot = items.entry(name).or_insert((0, Decimal::ZERO));
                slot.0 = slot.0.saturating_add(quantity);
                slot.1 += unit_price * Decimal::from(quantity);
            }
        }

        let mut per_point_of_sale: Vec<PosSales> = per_pos
            .into_iter()
            .map(|(id, (count, total))| PosSales {
                point_of_sale: id,
                name: self.pos_name(id),
                count,
                total,
            })
            .collect();
        per_point_of_sale.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

        let mut top_items: Vec<ItemSales> = items
            .into_iter()
            .map(|(name, (quantity, total))| ItemSales {
                name,
                quantity,
                total: total.round_dp(AMOUNT_SCALE),
            })
            .collect();
        top_items.sort_by(|a, b| {
            b.quantity
                .cmp(&a.quantity)
                .then_with(|| a.name.cmp(&b.name))
        });
        top_items.truncate(TOP_ITEMS);

        SalesSummary {
            count,
            total,
            average,
            per_point_of_sale,
            top_items,
        }
    }

    /// Audited listing of transactions in `range`
    ///
    /// # Arguments
    ///
    /// * `range` - Inclusive UTC dates
    /// * `kind` - Only this kind of transaction, when given
    /// * `pos` - Only payments at this point of sale, when given
    pub fn transactions_report(
        &self,
        range: &DateRange,
        kind: Option<TransactionKind>,
        pos: Option<PosId>,
    ) -> TransactionsReport {
        let mut selected: Vec<Transaction> = self
            .log
            .all()
            .into_iter()
            .filter(|tx| range.contains(&tx.created_at))
            .filter(|tx| kind.map_or(true, |kind| tx.kind == kind))
            .filter(|tx| pos.map_or(true, |pos| tx.point_of_sale == Some(pos)))
            .collect();
        selected.reverse();

        let mut report = TransactionsReport {
            entries: Vec::with_capacity(selected.len()),
            top_up_count: 0,
            top_up_total: Decimal::ZERO,
            payment_count: 0,
            payment_total: Decimal::ZERO,
            net: Decimal::ZERO,
        };

        for tx in selected {
            match tx.kind {
                TransactionKind::TopUp => {
                    report.top_up_count += 1;
                    report.top_up_total += tx.amount;
                }
                TransactionKind::Payment => {
                    report.payment_count += 1;
                    report.payment_total += tx.amount;
                }
            }
            report.entries.push(ReportEntry {
                card_last_four: tx.card_number.last_four().to_string(),
                point_of_sale_name: tx.point_of_sale.map(|id| self.pos_name(id)),
                audit: PaymentAudit::of(&tx),
                transaction: tx,
            });
        }
        report.net = report.top_up_total - report.payment_total;
        report
    }
}

/// Extract `(item, quantity)` pairs from a description like `Coffee x2, Bagel x1`
///
/// Parts without a quantity marker are skipped.
pub fn parse_items(description: &str) -> Vec<(String, u64)> {
    description.split(',').filter_map(parse_item).collect()
}

/// Match `<name><whitespace>x<optional whitespace><digits>` at the start of `part`,
/// taking the shortest possible name
fn parse_item(part: &str) -> Option<(String, u64)> {
    let part = part.trim();

    for (split, c) in part.char_indices().skip(1) {
        if !c.is_whitespace() {
            continue;
        }
        let rest = part[split..].trim_start();
        let rest = match rest.strip_prefix(['x', 'X']) {
            Some(rest) => rest.trim_start(),
            None => continue,
        };
        let digits: &str = &rest[..rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len())];
        if digits.is_empty() {
            continue;
        }
        let name = part[..split].trim();
        return digits
            .parse::<u64>()
            .ok()
            .map(|quantity| (name.to_string(), quantity));
    }
    None
}
