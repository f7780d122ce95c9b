//! Comprehensive examples demonstrating dfcache features
//!
//! Run with: cargo run --example comprehensive

use chrono::{DateTime, TimeDelta};
use dfcache::{
    DataKind, DfCache, DfCacheBuilder, FetchOptions, FlatnessConfig, Frame, Timestamp,
    flatness_analysis, total_flat_duration,
};
use std::collections::HashMap;
use std::time::Duration;

fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(1_600_000_020 + secs, 0)
        .unwrap_or_default()
        .fixed_offset()
}

/// Stand-in for a remote metrics API: one byte counter per minute per link.
struct CounterApi {
    links: Vec<String>,
}

impl CounterApi {
    fn query(&self, start: Timestamp, end: Timestamp) -> dfcache::Result<Option<Frame>> {
        let mut index = Vec::new();
        let mut links = Vec::new();
        let mut bytes = Vec::new();

        let mut t = start;
        while t < end {
            let minute = (t - ts(0)).num_minutes();
            for (i, link) in self.links.iter().enumerate() {
                index.push(t);
                links.push(link.clone());
                // The first link is stuck at a constant rate.
                let value = if i == 0 {
                    3_750_000.0
                } else {
                    ((minute * 37 + i as i64 * 11) % 90 + 5) as f64 * 75_000.0
                };
                bytes.push(value);
            }
            t += TimeDelta::minutes(1);
        }

        if index.is_empty() {
            return Ok(None);
        }
        Frame::new(index)
            .with_column("link", links)?
            .with_column("bytes", bytes)
            .map(Some)
    }
}

/// Example: Storing and reading partitions
fn example_store_and_get(cache: &DfCache) -> dfcache::Result<()> {
    println!("\n=== Example: Store and Get ===");

    let frame = Frame::new(vec![ts(0), ts(60), ts(120)])
        .with_column("link", vec!["r1:eth0", "r1:eth0", "r1:eth0"])?
        .with_column("bytes", vec![100.0, 200.0, 300.0])?;
    let partition = cache.store(&frame)?;
    println!("Stored partition {:?}", partition.path);

    if let Some(frame) = cache.get(Some(ts(60)), None, None)? {
        println!("Read back {}", frame);
    }

    cache.clear()?;
    Ok(())
}

/// Example: Incremental fetch in one-hour steps
fn example_fetch(cache: &DfCache, api: &CounterApi) -> dfcache::Result<()> {
    println!("\n=== Example: Incremental Fetch ===");

    let options = FetchOptions::new()
        .with_step(Duration::from_secs(3600))
        .with_dedup_columns(["time", "link"]);

    let query = |start: Timestamp, end: Timestamp, api: &CounterApi| api.query(start, end);

    let first = cache.fetch(query, ts(0), ts(6 * 3600), &options, api)?;
    println!(
        "First fetch: {} rows in {} partitions",
        first.as_ref().map_or(0, Frame::len),
        cache.partitions()?.len()
    );

    // Re-fetching the same range rewrites the same partitions.
    let second = cache.fetch(query, ts(0), ts(6 * 3600), &options, api)?;
    println!("Second fetch identical: {}", first == second);

    let mut out = std::io::stdout();
    cache.info(&mut out)?;
    Ok(())
}

/// Example: Flatness analysis over cached counters
fn example_flatness(cache: &DfCache, api: &CounterApi) -> dfcache::Result<()> {
    println!("\n=== Example: Flatness Analysis ===");

    let Some(frame) = cache.get(None, None, Some(&["time", "link"][..]))? else {
        println!("Cache is empty");
        return Ok(());
    };

    let speeds: HashMap<String, f64> = api
        .links
        .iter()
        .map(|link| (link.clone(), 1e6))
        .collect();
    let config = FlatnessConfig::new()
        .with_data_column("bytes", DataKind::Bytes)
        .with_window(Duration::from_secs(1800))
        .with_min_periods(10)
        .with_flatness_limit(0.5);

    let result = flatness_analysis(&frame, &speeds, &config)?;
    for (link, intervals) in &result {
        println!(
            "{}: {} flat intervals, {} minutes total",
            link,
            intervals.len(),
            total_flat_duration(intervals).num_minutes()
        );
        for interval in intervals {
            println!("  {}", interval);
        }
    }
    Ok(())
}

fn main() -> dfcache::Result<()> {
    println!("dfcache Comprehensive Examples");
    println!("==============================");

    let path = std::env::temp_dir().join("dfcache-demo");
    let cache = DfCacheBuilder::new()
        .with_path(&path)
        .with_empty_lookback(Duration::from_secs(6 * 3600))
        .build()?;
    cache.clear()?;

    let api = CounterApi {
        links: vec!["r1:eth0".to_string(), "r2:xe-0/0/1".to_string()],
    };

    example_store_and_get(&cache)?;
    example_fetch(&cache, &api)?;
    example_flatness(&cache, &api)?;

    cache.clear()?;
    println!("\n✅ All examples completed successfully!");
    Ok(())
}
