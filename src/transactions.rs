//! Relational transaction records and a CSV-backed store for them.
//!
//! The store is the authoritative home of transaction rows. Retrieval only
//! reads from it through [`TransactionLookup`].

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, RwLock,
    },
    time::Instant,
};

/// One purchased line item as reported by extraction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TransactionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl TransactionItem {
    pub fn new(name: &str, price: f64) -> Self {
        Self {
            name: Some(name.to_string()),
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub id: i64,

    pub vendor: Option<String>,
    pub date: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    #[serde(default)]
    pub items: Vec<TransactionItem>,

    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub payment_method: Option<String>,
    pub created_at: Option<String>,
}

/// Fields of a transaction that has not been stored yet.
///
/// Deserializes straight from extraction output, where the amount is
/// reported as `total`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransactionCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, alias = "total", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub items: Vec<TransactionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransactionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<TransactionItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

/// Read-only access to stored transactions by id.
pub trait TransactionLookup: Send + Sync {
    fn lookup_transaction(&self, id: i64) -> anyhow::Result<Option<Transaction>>;
}

pub trait TransactionManager: TransactionLookup {
    fn create(&self, create: TransactionCreate) -> anyhow::Result<Transaction>;
    fn update(&self, id: i64, update: TransactionUpdate) -> anyhow::Result<Transaction>;
    fn delete(&self, id: i64) -> anyhow::Result<bool>;
    fn list(&self) -> anyhow::Result<Vec<Transaction>>;
}

#[derive(Debug, Clone, Default)]
pub struct TransactionCsv {
    list: Arc<RwLock<Vec<Transaction>>>,
    /// Next id to hand out; only grows, so deleted ids are never reused
    next_id: Arc<AtomicI64>,
    path: String,
}

const CSV_HEADERS: [&str; 10] = [
    "id",
    "vendor",
    "date",
    "amount",
    "category",
    "items_json",
    "subtotal",
    "tax",
    "payment_method",
    "created_at",
];

fn optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn optional_number(value: &str) -> anyhow::Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(value.parse::<f64>()?))
}

fn number_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn next_id_path(path: &str) -> String {
    format!("{path}.next_id")
}

fn lock_poisoned<T>(err: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow!("transaction list lock poisoned: {err}")
}

impl TransactionCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new transaction database at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut transactions = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let cell = |idx: usize| {
                record
                    .get(idx)
                    .ok_or_else(|| anyhow!("couldnt get record {}", CSV_HEADERS[idx]))
            };

            let items_json = cell(5)?;
            let items = if items_json.is_empty() {
                vec![]
            } else {
                serde_json::from_str(items_json)?
            };

            transactions.push(Transaction {
                id: cell(0)?.parse::<i64>()?,
                vendor: optional_text(cell(1)?),
                date: optional_text(cell(2)?),
                amount: optional_number(cell(3)?)?,
                category: optional_text(cell(4)?),
                items,
                subtotal: optional_number(cell(6)?)?,
                tax: optional_number(cell(7)?)?,
                payment_method: optional_text(cell(8)?),
                created_at: optional_text(cell(9)?),
            });
        }

        log::debug!(
            "took {}ms to read csv",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        let stored_next_id = match std::fs::read_to_string(next_id_path(path)) {
            Ok(value) => Some(value.trim().parse::<i64>()?),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        let next_id = transactions
            .iter()
            .map(|tx| tx.id + 1)
            .chain(stored_next_id)
            .fold(1, i64::max);

        Ok(TransactionCsv {
            list: Arc::new(RwLock::new(transactions)),
            next_id: Arc::new(AtomicI64::new(next_id)),
            path: path.to_string(),
        })
    }

    fn save(&self, transactions: &[Transaction]) -> anyhow::Result<()> {
        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for tx in transactions {
            let items_json = if tx.items.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&tx.items)?
            };
            csv_wrt.write_record([
                tx.id.to_string(),
                tx.vendor.clone().unwrap_or_default(),
                tx.date.clone().unwrap_or_default(),
                number_cell(tx.amount),
                tx.category.clone().unwrap_or_default(),
                items_json,
                number_cell(tx.subtotal),
                number_cell(tx.tax),
                tx.payment_method.clone().unwrap_or_default(),
                tx.created_at.clone().unwrap_or_default(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        std::fs::write(
            next_id_path(&self.path),
            self.next_id.load(Ordering::SeqCst).to_string(),
        )?;
        Ok(())
    }
}

impl TransactionLookup for TransactionCsv {
    fn lookup_transaction(&self, id: i64) -> anyhow::Result<Option<Transaction>> {
        let transactions = self.list.read().map_err(lock_poisoned)?;
        Ok(transactions.iter().find(|tx| tx.id == id).cloned())
    }
}

impl TransactionManager for TransactionCsv {
    fn create(&self, create: TransactionCreate) -> anyhow::Result<Transaction> {
        let mut transactions = self.list.write().map_err(lock_poisoned)?;

        // a failed save leaves a gap in the ids, never a reused one
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let tx = Transaction {
            id,
            vendor: create.vendor.filter(|v| !v.is_empty()),
            date: create.date.filter(|d| !d.is_empty()),
            amount: create.amount,
            category: create.category.filter(|c| !c.is_empty()),
            items: create.items,
            subtotal: create.subtotal,
            tax: create.tax,
            payment_method: create.payment_method.filter(|p| !p.is_empty()),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };

        transactions.push(tx.clone());
        if let Err(err) = self.save(&transactions) {
            transactions.pop();
            return Err(err);
        }

        Ok(tx)
    }

    fn update(&self, id: i64, update: TransactionUpdate) -> anyhow::Result<Transaction> {
        let mut transactions = self.list.write().map_err(lock_poisoned)?;

        let idx = transactions
            .iter()
            .position(|tx| tx.id == id)
            .ok_or_else(|| anyhow!("Transaction with id {} not found", id))?;

        let previous = transactions[idx].clone();
        let tx = &mut transactions[idx];

        if let Some(vendor) = update.vendor {
            tx.vendor = Some(vendor);
        }
        if let Some(date) = update.date {
            tx.date = Some(date);
        }
        if let Some(amount) = update.amount {
            tx.amount = Some(amount);
        }
        if let Some(category) = update.category {
            tx.category = Some(category);
        }
        if let Some(items) = update.items {
            tx.items = items;
        }
        if let Some(payment_method) = update.payment_method {
            tx.payment_method = Some(payment_method);
        }

        let result = tx.clone();
        if let Err(err) = self.save(&transactions) {
            transactions[idx] = previous;
            return Err(err);
        }

        Ok(result)
    }

    fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let mut transactions = self.list.write().map_err(lock_poisoned)?;
        let Some(idx) = transactions.iter().position(|tx| tx.id == id) else {
            return Ok(false);
        };

        let removed = transactions.remove(idx);
        if let Err(err) = self.save(&transactions) {
            transactions.insert(idx, removed);
            return Err(err);
        }

        Ok(true)
    }

    fn list(&self) -> anyhow::Result<Vec<Transaction>> {
        Ok(self.list.read().map_err(lock_poisoned)?.clone())
    }
}
