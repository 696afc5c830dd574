//! Segment rollover tests.
//!
//! The active segment rolls over once it crosses the configured size;
//! the new file's name encodes the sequence of its first record, and
//! replay stitches the segments back together in ascending order.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::wal::{Wal, WalOp, WalOptions};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// Options that roll over after three `k####`/`v####` records
    /// (3 × 27 = 81 ≥ 60).
    fn tiny_segments() -> WalOptions {
        WalOptions {
            rollover_size: 60,
            ..WalOptions::default()
        }
    }

    fn append_n(wal: &Wal, count: u32) {
        for i in 1..=count {
            let key = format!("k{i:04}");
            let value = format!("v{i:04}");
            wal.append(WalOp::Set, key.as_bytes(), Some(value.as_bytes()))
                .unwrap();
        }
    }

    #[test]
    fn test_rollover_creates_seq_named_segments() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), tiny_segments()).unwrap();
        append_n(&wal, 10);

        let segments = wal.segments();
        assert_eq!(segments.len(), 4);
        let starts: Vec<u64> = segments.iter().map(|info| info.start_seq).collect();
        assert_eq!(starts, vec![1, 4, 7, 10]);
        for info in &segments {
            assert!(info.path.exists());
            let name = info.path.file_name().unwrap().to_str().unwrap();
            assert_eq!(name, format!("wal-{:06}.log", info.start_seq));
        }
    }

    #[test]
    fn test_replay_spans_segments_in_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), tiny_segments()).unwrap();
        append_n(&wal, 11);

        let mut seqs = Vec::new();
        let stats = wal
            .replay(0, |record| {
                seqs.push(record.seq);
                Ok(())
            })
            .unwrap();
        assert_eq!(seqs, (1..=11).collect::<Vec<u64>>());
        assert_eq!(stats.max_seq, 11);
    }

    #[test]
    fn test_reopen_after_rollover() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let wal = Wal::open(tmp.path(), tiny_segments()).unwrap();
            append_n(&wal, 7);
        }

        let wal = Wal::open(tmp.path(), tiny_segments()).unwrap();
        assert_eq!(wal.next_seq(), 8);
        // Segment 7 holds a single record and stays below the rollover
        // size, so appends continue in it rather than a new file.
        wal.append(WalOp::Set, b"kxxxx", Some(b"vxxxx")).unwrap();
        let segments = wal.segments();
        assert_eq!(segments.last().unwrap().start_seq, 7);
        assert_eq!(segments.last().unwrap().end_seq, 8);

        let stats = wal.replay(0, |_| Ok(())).unwrap();
        assert_eq!(stats.applied, 8);
    }

    #[test]
    fn test_cleanup_old_logs_spares_live_segments() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), tiny_segments()).unwrap();
        append_n(&wal, 10);
        assert_eq!(wal.segments().len(), 4);

        // Segments [1..=3] and [4..=6] end before 7 and are removed;
        // [7..=9] and the active segment survive.
        let removed = wal.cleanup_old_logs(7).unwrap();
        assert_eq!(removed, 2);
        let starts: Vec<u64> = wal.segments().iter().map(|info| info.start_seq).collect();
        assert_eq!(starts, vec![7, 10]);

        let mut seqs = Vec::new();
        wal.replay(0, |record| {
            seqs.push(record.seq);
            Ok(())
        })
        .unwrap();
        assert_eq!(seqs, (7..=10).collect::<Vec<u64>>());
    }
}
