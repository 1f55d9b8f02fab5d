//! # Floor Sheet Live Data Test
//!
//! Downloads today's floor sheet, or one symbol's floor sheet on a business
//! date, with either the async or the blocking client.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use lib_nepse::{init_logging, AsyncNepseClient, BlockingNepseClient, LoggerLocalOptions, NepseConfig};
use serde_json::Value;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Download a NEPSE floor sheet")]
struct Args {
    /// Restrict to one symbol, e.g. NABIL.
    #[arg(long)]
    symbol: Option<String>,

    /// Business date (YYYY-MM-DD) for --symbol; defaults to today.
    #[arg(long, requires = "symbol")]
    date: Option<NaiveDate>,

    /// Use the blocking client instead of the async one.
    #[arg(long)]
    blocking: bool,

    /// Print the first N rows.
    #[arg(long, default_value_t = 3)]
    show: usize,

    #[arg(long, env = "NEPSE_LOG_LEVEL", default_value = "info")]
    level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(
        "floorsheet_test",
        LoggerLocalOptions {
            level: args.level.clone(),
            ..LoggerLocalOptions::default()
        },
    )?;
    let config = NepseConfig::load().context("loading NEPSE configuration")?;

    let started = Instant::now();
    let rows = if args.blocking {
        let symbol = args.symbol.clone();
        let date = args.date;
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Value>> {
            let client = BlockingNepseClient::new(config)?;
            Ok(match symbol {
                Some(symbol) => client.get_floor_sheet_of(&symbol, date)?,
                None => client.get_floor_sheet()?,
            })
        })
        .await??
    } else {
        let client = AsyncNepseClient::new(config)?;
        match &args.symbol {
            Some(symbol) => client.get_floor_sheet_of(symbol, args.date).await?,
            None => client.get_floor_sheet().await?,
        }
    };

    info!(
        rows = rows.len(),
        blocking = args.blocking,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Floor sheet downloaded"
    );
    for row in rows.iter().take(args.show) {
        println!("{}", serde_json::to_string_pretty(row)?);
    }
    println!("[INFO] {} rows", rows.len());

    Ok(())
}
