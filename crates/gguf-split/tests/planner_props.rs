//! Property tests for shard planning and shard naming.

use std::ops::Range;

use gguf_container::{GgmlType, TensorInfo};
use gguf_split::{ShardPlanner, SplitError, SplitPolicy, split_path, split_prefix};
use proptest::prelude::*;

fn tensors(n_f32: &[u64]) -> Vec<TensorInfo> {
    n_f32
        .iter()
        .enumerate()
        .map(|(i, &n)| TensorInfo::new(format!("t{i}"), vec![n], GgmlType::F32).unwrap())
        .collect()
}

fn assert_contiguous(ranges: &[Range<usize>], n: usize) {
    let mut next = 0;
    for r in ranges {
        assert_eq!(r.start, next, "ranges must be contiguous");
        assert!(r.end > r.start, "data shards are never empty");
        next = r.end;
    }
    assert_eq!(next, n, "every tensor is assigned");
}

proptest! {
    /// Every shard but the last holds exactly `cap` tensors.
    #[test]
    fn prop_max_tensors_layout(
        sizes in prop::collection::vec(1u64..64, 1..80),
        cap in 1usize..12,
    ) {
        let ts = tensors(&sizes);
        let p = ShardPlanner::new(SplitPolicy::MaxTensors(cap)).unwrap();
        let ranges = p.plan_ranges(&ts).unwrap();

        assert_contiguous(&ranges, ts.len());
        prop_assert_eq!(ranges.len(), ts.len().div_ceil(cap));
        prop_assert_eq!(p.shard_count(&ts).unwrap(), ranges.len());
        for r in &ranges[..ranges.len() - 1] {
            prop_assert_eq!(r.len(), cap);
        }
    }

    /// No shard exceeds the byte cap when every tensor fits on its own.
    #[test]
    fn prop_max_size_layout(
        sizes in prop::collection::vec(1u64..64, 1..80),
        slack in 0u64..1024,
    ) {
        let ts = tensors(&sizes);
        let largest = ts.iter().map(|t| t.size).max().unwrap();
        let cap = largest + slack;
        let p = ShardPlanner::new(SplitPolicy::MaxSize(cap)).unwrap();
        let ranges = p.plan_ranges(&ts).unwrap();

        assert_contiguous(&ranges, ts.len());
        for r in &ranges {
            let bytes: u64 = ts[r.clone()].iter().map(|t| t.size).sum();
            prop_assert!(bytes <= cap);
        }
        // greedy: the first tensor of the next shard did not fit
        for w in ranges.windows(2) {
            let bytes: u64 = ts[w[0].clone()].iter().map(|t| t.size).sum();
            prop_assert!(bytes + ts[w[1].start].size > cap);
        }

        let count = p.shard_count(&ts).unwrap();
        prop_assert_eq!(count, ranges.len());
        prop_assert!(count >= p.estimated_shard_count(&ts));
        prop_assert!(count <= ts.len());
    }

    /// A cap below the largest tensor always fails with that tensor's index.
    #[test]
    fn prop_max_size_rejects_oversized(
        sizes in prop::collection::vec(2u64..64, 1..40),
    ) {
        let ts = tensors(&sizes);
        let largest = ts.iter().map(|t| t.size).max().unwrap();
        let first_oversized = ts.iter().position(|t| t.size == largest).unwrap();
        let p = ShardPlanner::new(SplitPolicy::MaxSize(largest - 1)).unwrap();

        match p.plan_ranges(&ts) {
            Err(SplitError::SizeLimit { tensor_index, needed, .. }) => {
                prop_assert_eq!(tensor_index, first_oversized);
                prop_assert_eq!(needed, largest);
            }
            other => prop_assert!(false, "expected SizeLimit, got {:?}", other),
        }
    }

    /// `split_prefix` inverts `split_path` for every valid index.
    #[test]
    fn prop_naming_round_trip(
        prefix in "[a-z0-9_./-]{1,24}",
        count in 1usize..100_000,
        pick in any::<prop::sample::Index>(),
    ) {
        let index = pick.index(count);
        let path = split_path(&prefix, index, count);
        let s = path.to_str().unwrap();
        prop_assert_eq!(split_prefix(s, index, count), Some(prefix.as_str()));
        if count > 1 {
            prop_assert!(split_prefix(s, (index + 1) % count, count).is_none());
        }
    }
}
