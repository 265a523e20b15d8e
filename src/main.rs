// SPDX-FileCopyrightText: 2023 Linutronix GmbH
// SPDX-License-Identifier: GPL-3.0-or-later

//! Main executable of rsspredict
// we do not want to panic or exit, errors shall be reported to the caller
#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::expect_used,
        clippy::exit,
        clippy::unwrap_used,
        clippy::indexing_slicing,
        clippy::modulo_arithmetic, // % 0 panics - use checked_rem
        clippy::integer_division,  // / 0 panics - use checked_div
        clippy::unreachable,
        clippy::unwrap_in_result,
    )
)]

use anyhow::Result;
use clap::Parser;
use futures::lock::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

use rsspredict::predictor::RssContext;
use rsspredict::rss_query::EthtoolQuery;
use rsspredict::toeplitz::HashVariant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Network interface to predict for
    #[arg(value_name = "INTERFACE")]
    interface: String,

    /// Source endpoint of the flow, e.g. 192.0.2.1:1234 or [2001:db8::1]:1234
    #[arg(short, long)]
    src: SocketAddr,

    /// Destination endpoint of the flow
    #[arg(short, long)]
    dst: SocketAddr,

    /// Hash variant; queried from the driver if not provided
    #[arg(long, value_enum)]
    variant: Option<HashVariant>,

    /// Print the prediction as JSON
    #[arg(long)]
    json: bool,

    /// Also print the hash key read from the driver
    #[arg(long)]
    show_key: bool,
}

#[tokio::main(flavor = "current_thread")]
/// Main function of `rsspredict`
///
/// # Errors
/// Will return `Err` if the driver state cannot be read or the flow cannot
/// be hashed; the error is reported to the caller instead of panicking.
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let ethtool = EthtoolQuery::new();

    let variant = match cli.variant {
        Some(variant) => variant,
        None => ethtool.hash_variant(&cli.interface).await?,
    };

    let ctx = RssContext::prepare(Arc::new(Mutex::new(ethtool)), &cli.interface, variant).await?;

    if cli.show_key {
        let key = ctx
            .hash_key()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<Vec<_>>()
            .join(":");
        println!("RSS hash key: {key}");
    }

    let prediction = ctx.predict(cli.src, cli.dst).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        println!(
            "Flow {} -> {} on {} ({variant}): hash 0x{:08x} selects indirection table entry {} mapping to Rx queue {}",
            cli.src, cli.dst, cli.interface, prediction.hash, prediction.index, prediction.queue
        );
    }

    Ok(())
}
