use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use livebar::{Interval, LiveFeed, RuntimeClock};
use livebar_mock::MockBarSource;
use tracing_subscriber::fmt::format::FmtSpan;

// Runs on paused Tokio time: twelve simulated minutes pass in well under a second.
#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Suggested: RUST_LOG=info,livebar=debug (build with --features tracing)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();

    let clock = Arc::new(RuntimeClock::starting_at(Utc::now()));
    let source = Arc::new(MockBarSource::with_clock(clock.clone()).seed(42));

    let feed = LiveFeed::builder()
        .with_source(source)
        .clock(clock)
        .on_error(|key, err| eprintln!("{key}: skipped period: {err}"))
        .build()?;

    let aapl = feed.add_series("AAPL", "NASDAQ", Interval::I1m, None).await?;
    let msft = feed.add_series("MSFT", "NASDAQ", Interval::I5m, None).await?;
    let btc = feed.add_series("BTCUSD", "BINANCE", Interval::I1m, None).await?;

    for id in [aapl, msft, btc] {
        feed.subscribe(
            id,
            |key, bar| {
                println!(
                    "{key:<22} {} o={} h={} l={} c={} v={}",
                    bar.ts, bar.open, bar.high, bar.low, bar.close, bar.volume
                );
            },
            None,
        )
        .await?;
    }

    // Lookups and duplicate handling.
    if let Err(e) = feed.add_series("AAPL", "NASDAQ", Interval::I1m, None).await {
        println!("second add rejected: {e}");
    }
    if let Err(e) = feed.add_series("FAIL", "NASDAQ", Interval::I3m, None).await {
        println!("seed fetch failed: {e}");
    }
    println!("next trigger: {:?}", feed.next_trigger().await?);

    let recent = feed
        .history("AAPL", "NASDAQ", Interval::I15m, 4, None)
        .await?;
    let stamps: Vec<_> = recent.iter().map(|c| c.ts.to_rfc3339()).collect();
    println!("AAPL@15 history: {stamps:?}");

    tokio::time::sleep(Duration::from_secs(12 * 60)).await;

    for info in feed.series().await? {
        println!(
            "{} {} last_bar={:?} subscribers={}",
            info.id, info.key, info.last_bar_time, info.subscribers
        );
    }

    feed.remove_series(btc, None).await?;
    feed.shutdown().await;
    println!("running after shutdown: {}", feed.is_running().await?);
    Ok(())
}
