//! Scoped worker helpers for CPU-bound compression and indexing.
//!
//! All helpers preserve input order in their output and run inline when a
//! single worker is requested.

use std::panic;
use std::thread;

/// Splits `items` into at most `workers` contiguous chunks and maps each
/// chunk on its own scoped thread.
pub fn map_chunks<'a, T, R, F>(items: &'a [T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&'a [T]) -> R + Sync,
{
    let workers = workers.max(1);
    if workers == 1 || items.len() < 2 {
        return vec![f(items)];
    }
    let chunk_len = items.len().div_ceil(workers);

    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = items
            .chunks(chunk_len)
            .map(|chunk| scope.spawn(move || f(chunk)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    })
}

/// Runs `f` over owned `items` on up to `workers` threads and returns the
/// results in input order, or the first error by input position.
pub fn try_map<T, R, E, F>(items: Vec<T>, workers: usize, f: F) -> Result<Vec<R>, E>
where
    T: Send,
    R: Send,
    E: Send,
    F: Fn(T) -> Result<R, E> + Sync,
{
    let workers = workers.max(1).min(items.len().max(1));
    if workers == 1 {
        return items.into_iter().map(f).collect();
    }

    let mut buckets: Vec<Vec<(usize, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        buckets[i % workers].push((i, item));
    }

    let mut results: Vec<(usize, Result<R, E>)> = thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = buckets
            .into_iter()
            .map(|bucket| {
                scope.spawn(move || {
                    bucket
                        .into_iter()
                        .map(|(i, item)| (i, f(item)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    });

    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_chunks_preserves_order() {
        let items: Vec<u32> = (0..100).collect();
        let sums = map_chunks(&items, 4, |chunk| chunk.to_vec());
        let flat: Vec<u32> = sums.into_iter().flatten().collect();
        assert_eq!(flat, items);
    }

    #[test]
    fn map_chunks_results_may_borrow_from_items() {
        let words: Vec<Vec<u8>> = vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()];
        let firsts: Vec<Vec<&[u8]>> =
            map_chunks(&words, 2, |chunk| chunk.iter().map(|w| &w[..1]).collect());
        let flat: Vec<&[u8]> = firsts.into_iter().flatten().collect();
        assert_eq!(flat, vec![&b"a"[..], b"c", b"e"]);
    }

    #[test]
    fn map_chunks_single_worker_inline() {
        let items = [1, 2, 3];
        let out = map_chunks(&items, 1, |chunk| chunk.len());
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn try_map_orders_results() {
        let out: Result<Vec<u32>, String> = try_map((0..10).collect(), 3, |x| Ok(x * 2));
        assert_eq!(out.unwrap(), (0..10).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn try_map_reports_first_error() {
        let out: Result<Vec<u32>, u32> =
            try_map((0..10).collect(), 4, |x| if x >= 5 { Err(x) } else { Ok(x) });
        assert_eq!(out.unwrap_err(), 5);
    }
}
