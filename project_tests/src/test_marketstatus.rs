//! # Market Status Live Data Test
//!
//! Authenticates against NEPSE, prints the market status, the dummy id
//! derived from it and the payload ids of the current session.

use anyhow::Context;
use clap::Parser;
use lib_nepse::{init_logging, AsyncNepseClient, LoggerLocalOptions, NepseConfig, PayloadVariant};

#[derive(Parser, Debug)]
#[command(about = "Fetch the live NEPSE market status")]
struct Args {
    /// Log level (silly, trace, debug, info, warn, error, fatal).
    #[arg(long, env = "NEPSE_LOG_LEVEL", default_value = "info")]
    level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(
        "market_test",
        LoggerLocalOptions {
            level: args.level,
            ..LoggerLocalOptions::default()
        },
    )?;

    let config = NepseConfig::load().context("loading NEPSE configuration")?;
    let client = AsyncNepseClient::new(config)?;

    println!("[*] Requesting live data from NEPSE...");

    let status = match client.get_market_status().await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("\n[ERROR] Market status retrieval failed:");
            eprintln!(">>> {e}");
            std::process::exit(1);
        }
    };

    println!("\n[SUCCESS] Data received:");
    println!("-----------------------------------------------");
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("-----------------------------------------------");

    let dummy_id = client.get_dummy_id().await?;
    println!("[INFO] Dummy id: {dummy_id} (market open: {})", status.is_open());
    for variant in [PayloadVariant::Scrip, PayloadVariant::Generic, PayloadVariant::FloorSheet] {
        println!("[INFO] Payload id {variant:?}: {}", client.get_payload_id(variant).await?);
    }
    println!("[INFO] Token refreshes: {}", client.token_refreshes());

    Ok(())
}
