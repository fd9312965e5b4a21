use login_common::record::{Batch, BatchId};

/// Size of each worker's slice: `ceil(items / workers)`.
pub fn batch_size(items: usize, workers: usize) -> usize {
    items.div_ceil(workers.max(1))
}

/// Split deduplicated bodies into contiguous slices of `batch_size(len, workers)`, one per worker.
/// Empty slices are not returned, so fewer than `workers` batches may come back. Every body lands
/// in exactly one batch.
pub fn partition(bodies: Vec<String>, workers: usize) -> Vec<Batch> {
    let size = batch_size(bodies.len(), workers);
    if size == 0 {
        return Vec::new();
    }

    let mut batches = Vec::with_capacity(workers);
    let mut remaining = bodies.into_iter().peekable();
    while remaining.peek().is_some() {
        let id = BatchId(batches.len());
        let bodies: Vec<String> = remaining.by_ref().take(size).collect();
        batches.push(Batch { id, bodies });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{{\"user_id\":\"u{i}\"}}")).collect()
    }

    fn sizes(batches: &[Batch]) -> Vec<usize> {
        batches.iter().map(Batch::len).collect()
    }

    #[test]
    fn test_batch_size_is_ceiling() {
        assert_eq!(batch_size(10, 4), 3);
        assert_eq!(batch_size(8, 4), 2);
        assert_eq!(batch_size(1, 4), 1);
        assert_eq!(batch_size(0, 4), 0);
        assert_eq!(batch_size(5, 0), 5);
    }

    #[test]
    fn test_ten_messages_four_workers() {
        let batches = partition(bodies(10), 4);

        assert_eq!(sizes(&batches), vec![3, 3, 3, 1]);
        let ids: Vec<BatchId> = batches.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![BatchId(0), BatchId(1), BatchId(2), BatchId(3)]);
    }

    #[test]
    fn test_empty_slices_are_skipped() {
        // ceil(9 / 4) = 3, so the fourth worker gets nothing.
        assert_eq!(sizes(&partition(bodies(9), 4)), vec![3, 3, 3]);
        assert_eq!(sizes(&partition(bodies(2), 8)), vec![1, 1]);
        assert!(partition(Vec::new(), 4).is_empty());
    }

    #[test]
    fn test_partition_is_a_disjoint_exhaustive_cover() {
        for (n, workers) in [(10, 4), (17, 3), (1, 1), (64, 8), (7, 16)] {
            let input = bodies(n);
            let batches = partition(input.clone(), workers);

            assert!(batches.len() <= workers);
            assert!(batches.iter().all(|b| !b.is_empty()));

            let flattened: Vec<String> = batches.into_iter().flat_map(|b| b.bodies).collect();
            assert_eq!(flattened, input, "n={n} workers={workers}");
        }
    }
}
