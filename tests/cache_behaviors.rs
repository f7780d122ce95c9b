use std::fs;

use chrono::{DateTime, FixedOffset, TimeZone};
use dfcache::interval::{mangle_name, partition_file_name};
use dfcache::{DfCache, DfCacheBuilder, DfCacheError, Frame, Timestamp};
use tempfile::TempDir;

fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(1_700_000_000 + secs, 0)
        .unwrap()
        .fixed_offset()
}

fn frame_at(secs: &[i64]) -> Frame {
    let values: Vec<f64> = secs.iter().map(|s| *s as f64).collect();
    let links: Vec<String> = secs.iter().map(|_| "r1:eth0".to_string()).collect();
    Frame::new(secs.iter().map(|s| ts(*s)).collect())
        .with_column("link", links)
        .unwrap()
        .with_column("value", values)
        .unwrap()
}

fn three_partitions(cache: &DfCache) {
    cache.store(&frame_at(&[0, 5, 10])).unwrap();
    cache.store(&frame_at(&[10, 15, 20])).unwrap();
    cache.store(&frame_at(&[20, 25, 30])).unwrap();
}

#[test]
fn empty_cache_returns_none_everywhere() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    assert_eq!(cache.oldest().unwrap(), None);
    assert_eq!(cache.newest().unwrap(), None);
    assert!(cache.get(None, None, None).unwrap().is_none());
    assert!(cache.get(Some(ts(0)), Some(ts(10)), None).unwrap().is_none());
    assert!(cache.files_in_range(None, None, false).unwrap().is_empty());
    assert_eq!(cache.clear().unwrap(), 0);
}

#[test]
fn builder_requires_path_and_creates_directory() {
    let err = DfCacheBuilder::new().build().unwrap_err();
    assert!(matches!(err, DfCacheError::InvalidConfiguration(_)));

    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("a").join("b");
    let cache = DfCacheBuilder::new().with_path(&nested).build().unwrap();

    assert!(nested.is_dir());
    assert_eq!(cache.path(), nested.as_path());
}

#[test]
fn opening_a_file_path_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("not_a_dir");
    fs::write(&file, b"x").unwrap();

    match DfCache::open(&file) {
        Err(DfCacheError::NotADirectory { path }) => assert_eq!(path, file),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn files_in_range_selects_overlaps_and_containment() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    let overlapping = cache
        .files_in_range(Some(ts(5)), Some(ts(25)), false)
        .unwrap();
    assert_eq!(overlapping.len(), 3);

    let contained = cache
        .files_in_range(Some(ts(10)), Some(ts(20)), true)
        .unwrap();
    assert_eq!(contained.len(), 1);
    assert_eq!((contained[0].start, contained[0].end), (ts(10), ts(20)));

    // A partition ending exactly at the query start does not overlap.
    let after = cache
        .files_in_range(Some(ts(10)), Some(ts(12)), false)
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].start, ts(10));

    let all = cache.files_in_range(None, None, false).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].start <= w[1].start));
}

#[test]
fn files_in_range_rejects_inverted_or_empty_range() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    match cache.files_in_range(Some(ts(20)), Some(ts(10)), false) {
        Err(DfCacheError::InvalidTimeRange { start, end }) => {
            assert_eq!(start, ts(20));
            assert_eq!(end, ts(10));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        cache.files_in_range(Some(ts(10)), Some(ts(10)), true),
        Err(DfCacheError::InvalidTimeRange { .. })
    ));

    // get never raises on an inverted window.
    assert!(cache.get(Some(ts(20)), Some(ts(10)), None).unwrap().is_none());
}

#[test]
fn oldest_and_newest_track_partition_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    assert_eq!(cache.oldest().unwrap(), Some(ts(0)));
    assert_eq!(cache.newest().unwrap(), Some(ts(30)));
}

#[test]
fn get_filters_rows_inclusively_across_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    let frame = cache.get(Some(ts(5)), Some(ts(20)), None).unwrap().unwrap();
    // 5, 10 (first partition), 10, 15, 20 (second) and 20 (third)
    assert_eq!(
        frame.index(),
        &[ts(5), ts(10), ts(10), ts(15), ts(20), ts(20)]
    );
    assert!(frame.is_sorted());

    let deduped = cache
        .get(Some(ts(5)), Some(ts(20)), Some(&["time", "link"][..]))
        .unwrap()
        .unwrap();
    assert_eq!(deduped.index(), &[ts(5), ts(10), ts(15), ts(20)]);
    assert_eq!(deduped.float_column("value").unwrap(), &[5.0, 10.0, 15.0, 20.0]);

    let everything = cache.get(None, None, None).unwrap().unwrap();
    assert_eq!(everything.len(), 9);

    // A window inside a partition but between its rows yields nothing.
    assert!(cache.get(Some(ts(1)), Some(ts(4)), None).unwrap().is_none());
}

#[test]
fn single_row_partition_is_readable() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    cache.store(&frame_at(&[5])).unwrap();

    assert_eq!(cache.oldest().unwrap(), Some(ts(5)));
    assert_eq!(cache.newest().unwrap(), Some(ts(5)));

    let frame = cache.get(None, None, None).unwrap().unwrap();
    assert_eq!(frame.index(), &[ts(5)]);
    assert_eq!(frame.float_column("value").unwrap(), &[5.0]);

    let exact = cache.get(Some(ts(5)), Some(ts(5)), None).unwrap().unwrap();
    assert_eq!(exact.len(), 1);
}

#[test]
fn get_includes_partition_ending_at_window_start() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    cache.store(&frame_at(&[0, 10])).unwrap();
    cache.store(&frame_at(&[20, 30])).unwrap();

    let frame = cache.get(Some(ts(10)), Some(ts(15)), None).unwrap().unwrap();
    assert_eq!(frame.index(), &[ts(10)]);

    let frame = cache.get(Some(ts(15)), Some(ts(20)), None).unwrap().unwrap();
    assert_eq!(frame.index(), &[ts(20)]);
}

#[test]
fn get_with_unknown_dedup_column_fails() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    match cache.get(None, None, Some(&["missing"][..])) {
        Err(DfCacheError::MissingColumn { column }) => assert_eq!(column, "missing"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn store_overwrites_partition_with_same_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    cache.store(&frame_at(&[0, 5, 10])).unwrap();
    let replacement = frame_at(&[0, 10]);
    let partition = cache.store(&replacement).unwrap();

    assert_eq!(cache.partitions().unwrap(), vec![partition]);
    let frame = cache.get(None, None, None).unwrap().unwrap();
    assert_eq!(frame, replacement);
}

#[test]
fn store_rejects_empty_frame() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    let err = cache.store(&Frame::new(Vec::new())).unwrap_err();
    assert!(matches!(err, DfCacheError::EmptyFrame));
}

#[test]
fn stored_frame_round_trips_with_offsets_and_text() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    let tz = FixedOffset::east_opt(2 * 3600).unwrap();
    let index: Vec<Timestamp> = (0..4)
        .map(|i| tz.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap())
        .collect();
    let frame = Frame::new(index)
        .with_index_name("ts")
        .with_column("device", vec!["r1", "r1", "r2", "r2"])
        .unwrap()
        .with_column("bytes", vec![1.5, -2.0, 0.0, 1e12])
        .unwrap();

    cache.store(&frame).unwrap();
    let read = cache.get(None, None, None).unwrap().unwrap();

    assert_eq!(read, frame);
    assert_eq!(read.index_name(), "ts");
    assert_eq!(read.index()[0].offset(), &tz);
}

#[test]
fn drop_range_removes_only_contained_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    assert_eq!(cache.drop_range(Some(ts(5)), Some(ts(25))).unwrap(), 1);

    let remaining = cache.partitions().unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].start, ts(0));
    assert_eq!(remaining[1].start, ts(20));

    assert_eq!(cache.drop_range(Some(ts(0)), None).unwrap(), 2);
    assert!(cache.get(None, None, None).unwrap().is_none());
}

#[test]
fn clear_empties_the_cache() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    three_partitions(&cache);

    assert_eq!(cache.clear().unwrap(), 3);
    assert!(cache.partitions().unwrap().is_empty());
    assert_eq!(cache.oldest().unwrap(), None);
}

#[test]
fn malformed_and_foreign_files_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    cache.store(&frame_at(&[0, 10])).unwrap();

    fs::write(temp_dir.path().join("garbage.chunk"), b"not a chunk").unwrap();
    fs::write(temp_dir.path().join("a_b_c.chunk"), b"").unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();
    fs::create_dir(temp_dir.path().join("subdir")).unwrap();

    assert_eq!(cache.partitions().unwrap().len(), 1);
    let frame = cache.get(None, None, None).unwrap().unwrap();
    assert_eq!(frame.len(), 2);
    assert_eq!(cache.clear().unwrap(), 1);
    assert!(temp_dir.path().join("garbage.chunk").exists());
}

#[test]
fn mangled_partition_names_are_read() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    let frame = frame_at(&[0, 10]);
    let partition = cache.store(&frame).unwrap();

    let mangled = mangle_name(&partition_file_name(&ts(0), &ts(10)));
    fs::rename(&partition.path, temp_dir.path().join(&mangled)).unwrap();

    let partitions = cache.partitions().unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!((partitions[0].start, partitions[0].end), (ts(0), ts(10)));
    assert_eq!(cache.get(None, None, None).unwrap().unwrap(), frame);
}

#[test]
fn corrupt_partition_surfaces_as_error() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    let partition = cache.store(&frame_at(&[0, 10])).unwrap();

    fs::write(&partition.path, b"DFCH garbage").unwrap();

    let err = cache.get(None, None, None).unwrap_err();
    assert!(matches!(
        err,
        DfCacheError::DataCorruption(_) | DfCacheError::InvalidPartition { .. }
    ));
}

#[test]
fn forged_row_count_surfaces_as_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();
    let partition = cache.store(&frame_at(&[0, 10])).unwrap();

    // "DFCH" | version | header_len u32 LE | JSON header | body
    let bytes = fs::read(&partition.path).unwrap();
    let header_len = u32::from_le_bytes(bytes[5..9].try_into().unwrap()) as usize;
    let mut header: serde_json::Value = serde_json::from_slice(&bytes[9..9 + header_len]).unwrap();
    header["num_rows"] = serde_json::Value::from(u64::MAX);
    let header = serde_json::to_vec(&header).unwrap();

    let mut forged = bytes[..5].to_vec();
    forged.extend_from_slice(&(header.len() as u32).to_le_bytes());
    forged.extend_from_slice(&header);
    forged.extend_from_slice(&bytes[9 + header_len..]);
    fs::write(&partition.path, forged).unwrap();

    let err = cache.get(None, None, None).unwrap_err();
    assert!(matches!(err, DfCacheError::DataCorruption(_)));
}

#[test]
fn info_reports_files_rows_and_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DfCache::open(temp_dir.path()).unwrap();

    let mut out = Vec::new();
    cache.info(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("files:  0"));
    assert!(text.contains("oldest: -"));

    three_partitions(&cache);
    let stats = cache.stats().unwrap();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.total_rows, 9);
    assert!(stats.total_bytes > 0);
    assert_eq!(stats.oldest, Some(ts(0)));
    assert_eq!(stats.newest, Some(ts(30)));

    let mut out = Vec::new();
    cache.info(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("files:  3"));
    assert!(text.contains("rows:   9"));
    assert!(text.contains(&ts(0).to_rfc3339()));
}
