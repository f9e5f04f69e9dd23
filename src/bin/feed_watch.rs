//! Binary to connect to the price feed service, navigate to a dashboard view
//! and print every update the view's feeds receive.
//!
//! # Usage
//!
//! ```sh
//! export PRICEFEED_URL="ws://localhost:8001/ws"   # optional
//! cargo run --bin feed_watch --features cli -- /bitcoin 30 0.92
//! ```
//!
//! Arguments are the router path (default `/`), how many seconds to listen
//! (default 10) and an optional exchange rate applied before printing.

use std::env;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::SelectAll;
use pricefeed_rs::constants::{DEFAULT_FEED_URL, FEED_URL_ENV};
use pricefeed_rs::feed::cache::FeedUpdate;
use pricefeed_rs::feed::view::desired_feeds;
use pricefeed_rs::types::Payload;
use pricefeed_rs::{CoordinatorBuilder, FeedError, View};
use tokio::time;

#[tokio::main]
async fn main() -> pricefeed_rs::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = env::var(FEED_URL_ENV).unwrap_or_else(|_| DEFAULT_FEED_URL.to_owned());
    let mut args = env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/".to_owned());
    let seconds: u64 = parse_arg(args.next(), 10)?;
    let rate: f64 = parse_arg(args.next(), 1.0)?;

    let view = View::from_path(&path);
    println!("Connecting to {url}…");
    let coordinator = CoordinatorBuilder::new(url)
        .initial_view(view.clone())
        .start()?;
    let handle = coordinator.handle();

    let mut updates = SelectAll::new();
    for feed in desired_feeds(&view) {
        println!("Watching {feed}");
        updates.push(handle.subscribe(feed).await?);
    }

    println!("Listening for {seconds} seconds on view {view}…\n");
    let deadline = time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n{seconds} seconds elapsed, disconnecting…");
                break;
            }
            update = updates.next() => match update {
                Some(update) => print_update(&update, rate),
                None => {
                    println!("Coordinator stopped");
                    break;
                }
            }
        }
    }

    let status = handle.status().await?;
    println!("{status:#?}");
    coordinator.shutdown().await?;
    println!("Done.");

    Ok(())
}

fn parse_arg<T: std::str::FromStr>(arg: Option<String>, default: T) -> pricefeed_rs::Result<T> {
    match arg {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| FeedError::InvalidArgument(format!("cannot parse argument `{raw}`"))),
    }
}

fn print_update(update: &FeedUpdate, rate: f64) {
    let tag = if update.stale { " stale" } else { "" };
    match update.payload.converted(rate) {
        Payload::Ranked(assets) => {
            println!("[{} #{}{tag}] {} assets", update.feed, update.seq, assets.len());
            for asset in assets.iter().take(5) {
                println!(
                    "  {:>3} {:<8} {:>14.2} {:>+7.2}%",
                    asset.market_cap_rank.unwrap_or_default(),
                    asset.symbol.to_uppercase(),
                    asset.current_price,
                    asset.price_change_percentage_24h,
                );
            }
        }
        Payload::History(points) => {
            let last = points.last().map(|p| p.price).unwrap_or_default();
            println!(
                "[{} #{}{tag}] {} points, last {:.2}",
                update.feed,
                update.seq,
                points.len(),
                last
            );
        }
    }
}
