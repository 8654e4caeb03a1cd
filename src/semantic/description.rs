//! Canonical text rendering of a transaction for embedding.
//!
//! The rendered sentence is what gets embedded, so the exact wording decides
//! search quality:
//! 1. Base sentence: vendor, date, category and amount (missing or empty
//!    fields fall back to fixed placeholders)
//! 2. Item clause: up to the first 10 named items with prices
//! 3. Overflow note when the receipt has more than 10 items

use crate::transactions::{Transaction, TransactionItem};

/// Maximum number of items listed by name in a description
const MAX_LISTED_ITEMS: usize = 10;

const UNKNOWN_VENDOR: &str = "unknown store";
const UNKNOWN_DATE: &str = "unknown date";
const GENERAL_CATEGORY: &str = "general";

fn or_placeholder<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => placeholder,
    }
}

/// Build the canonical description of a transaction.
///
/// Never fails: every input is optional. Items without a name are skipped in
/// the listing but still count toward the overflow note.
pub fn describe_transaction(
    vendor: Option<&str>,
    category: Option<&str>,
    items: &[TransactionItem],
    date: Option<&str>,
    amount: Option<f64>,
) -> String {
    let base = format!(
        "Transaction at {} on {} for {} spending ${:.2}",
        or_placeholder(vendor, UNKNOWN_VENDOR),
        or_placeholder(date, UNKNOWN_DATE),
        or_placeholder(category, GENERAL_CATEGORY),
        amount.unwrap_or(0.0),
    );

    let listed: Vec<String> = items
        .iter()
        .filter_map(|item| {
            item.name
                .as_ref()
                .map(|name| format!("{} (${:.2})", name, item.price.unwrap_or(0.0)))
        })
        .take(MAX_LISTED_ITEMS)
        .collect();

    if listed.is_empty() {
        return base;
    }

    let mut items_text = format!("Items: {}", listed.join(", "));
    if items.len() > MAX_LISTED_ITEMS {
        items_text.push_str(&format!(
            " and {} more items",
            items.len() - MAX_LISTED_ITEMS
        ));
    }

    format!("{}. {}", base, items_text)
}

/// Describe a stored transaction row.
pub fn describe(tx: &Transaction) -> String {
    describe_transaction(
        tx.vendor.as_deref(),
        tx.category.as_deref(),
        &tx.items,
        tx.date.as_deref(),
        tx.amount,
    )
}
