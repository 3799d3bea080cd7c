// Dump stored samples and the most recent aggregates as JSON.
//
// Usage: cargo run --example dump_store -- [DB_PATH] [LIMIT]
//   DB_PATH  default: ./data/errstats.db
//   LIMIT    default: 24 (aggregates)

use errstatsd::store::SampleStore;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("./data/errstats.db");
    let limit: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(24);

    let store = SampleStore::connect(path, 1, Duration::from_secs(5)).await?;
    let samples = store.list_samples().await?;
    let aggregates = store.recent_aggregates(limit).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "samples": samples,
            "aggregates": aggregates,
        }))?
    );
    Ok(())
}
