//! Splitting virtual users across the worker pool.

/// Virtual-user slots owned by each of `workers` workers, in pool order.
///
/// Every worker gets `concurrency / workers` slots and the first
/// `concurrency % workers` get one more. An empty pool owns nothing.
pub fn partition(concurrency: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = concurrency / workers;
    let remainder = concurrency % workers;
    (0..workers)
        .map(|index| base + usize::from(index < remainder))
        .collect()
}
