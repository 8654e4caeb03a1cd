use anyhow::Context;
use clap::Parser;
use serde::Serialize;

mod app;
mod cli;
mod config;
mod lock;
mod semantic;
#[cfg(test)]
mod tests;
mod transactions;
mod web;

use app::AppFactory;
use transactions::{TransactionCreate, TransactionItem};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    init_logging();

    let paths = AppFactory::get_paths()?;
    let app = AppFactory::create_app_service(&paths)?;

    match args.command {
        cli::Command::Add { transaction } => {
            let create = TransactionCreate {
                vendor: transaction.vendor,
                date: transaction.date,
                amount: transaction.amount,
                category: transaction.category,
                items: transaction
                    .items
                    .iter()
                    .map(|(name, price)| TransactionItem::new(name, *price))
                    .collect(),
                payment_method: transaction.payment_method,
                ..Default::default()
            };
            print_json(&app.create(create)?)?;
        }

        cli::Command::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {file}"))?;
            print_json(&app.import(&json)?)?;
        }

        cli::Command::Search { query, k } => {
            print_json(&app.search(&query, k))?;
        }

        cli::Command::Context { id, k } => {
            print_json(&app.context(id, k)?)?;
        }

        cli::Command::Stats => {
            print_json(&app.stats())?;
        }

        cli::Command::Delete { id } => {
            app.delete(id)?;
            println!("transaction {id} deleted");
        }

        cli::Command::Reindex => {
            print_json(&app.reindex()?)?;
        }

        cli::Command::Daemon => {
            web::start_daemon(app)?;
        }
    }

    Ok(())
}
