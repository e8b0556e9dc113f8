/// Estimates the worker count for an auto-sized pool.
///
/// This is a greedy longest-processing-time-first bin-packing pass over the
/// task weights. Tasks are considered in descending weight order and each
/// task goes to the least-loaded worker that can take it without exceeding
/// `runtime_limit`. A new worker is started (up to `max_count`) when no
/// existing worker fits. A single task heavier than the limit still gets a
/// worker of its own; the limit is a target, not a hard cap.
pub(crate) fn estimate_worker_count(weights: &[u64], runtime_limit: u64, max_count: usize) -> usize {
    let max_count = max_count.max(1);
    let mut weights = weights.to_vec();
    weights.sort_unstable_by(|a, b| b.cmp(a));
    let mut loads: Vec<u64> = vec![];
    for weight in weights {
        let target = loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .map(|(i, _)| i);
        match target {
            Some(i) if loads[i] + weight <= runtime_limit || loads.len() >= max_count => {
                loads[i] += weight;
            }
            _ => {
                loads.push(weight);
            }
        }
    }
    loads.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tasks() {
        assert_eq!(estimate_worker_count(&[], 100, 8), 0);
    }

    #[test]
    fn test_all_tasks_fit_one_worker() {
        assert_eq!(estimate_worker_count(&[10, 20, 30], 100, 8), 1);
    }

    #[test]
    fn test_tasks_spread_across_workers() {
        // 60 + 50 cannot share a worker under the limit of 100,
        // while 40 fits next to 50.
        assert_eq!(estimate_worker_count(&[50, 60, 40], 100, 8), 2);
    }

    #[test]
    fn test_oversized_task_gets_own_worker() {
        assert_eq!(estimate_worker_count(&[150], 100, 8), 1);
        assert_eq!(estimate_worker_count(&[150, 10], 100, 8), 2);
    }

    #[test]
    fn test_worker_count_capped() {
        let weights = vec![100; 10];
        assert_eq!(estimate_worker_count(&weights, 100, 4), 4);
    }

    #[test]
    fn test_deterministic() {
        let weights = vec![7, 3, 9, 1, 5, 8, 2];
        let a = estimate_worker_count(&weights, 10, 8);
        let b = estimate_worker_count(&weights, 10, 8);
        assert_eq!(a, b);
    }
}
