use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TransactionArgs {
    /// Store or merchant name
    #[clap(short, long)]
    pub vendor: Option<String>,

    /// Transaction date, e.g. 2024-01-15
    #[clap(short, long)]
    pub date: Option<String>,

    /// Total amount paid
    #[clap(short, long)]
    pub amount: Option<f64>,

    /// Spending category, e.g. groceries
    #[clap(short, long)]
    pub category: Option<String>,

    /// Purchased item as "name=price", can be repeated
    #[clap(short, long = "item", value_parser = parse_item)]
    pub items: Vec<(String, f64)>,

    #[clap(long)]
    pub payment_method: Option<String>,
}

fn parse_item(value: &str) -> Result<(String, f64), String> {
    let (name, price) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected name=price, got '{value}'"))?;
    let price = price
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid price '{price}': {e}"))?;
    Ok((name.trim().to_string(), price))
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Store a transaction and index it
    Add {
        #[command(flatten)]
        transaction: TransactionArgs,
    },

    /// Import a JSON array of extracted receipts
    Import {
        /// Path to the JSON file
        file: String,
    },

    /// Find past transactions similar to a free-text query
    Search {
        query: String,

        /// Number of results (defaults to retrieval.default_k)
        #[clap(short, long)]
        k: Option<usize>,
    },

    /// Show transactions similar to a stored one with a summary
    Context {
        id: i64,

        /// Number of neighbors (defaults to retrieval.default_k)
        #[clap(short, long)]
        k: Option<usize>,
    },

    /// Show vector index statistics
    Stats,

    /// Delete a transaction and its vector
    Delete { id: i64 },

    /// Rebuild the vector index from the transaction store
    Reindex,

    /// Start the HTTP daemon
    Daemon,
}
