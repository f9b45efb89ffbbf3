use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::endpoint::{effective_weights, now_millis, Endpoint};
use crate::load_balancer::LoadBalancer;

/// Weighted round-robin with one sequence counter per service key.
///
/// With unequal weights the position `seq % total` is walked through a
/// schedule that hands out one slot per pass to every candidate with weight
/// left, so any `total` consecutive picks give each candidate exactly its
/// weight. Zero-weight candidates never get a slot in that schedule.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    sequences: DashMap<String, AtomicU64>,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self, service_key: &str) -> u64 {
        if let Some(counter) = self.sequences.get(service_key) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.sequences
            .entry(service_key.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn pick_weighted(weights: &[u32], sequence: u64) -> usize {
        let max = weights.iter().copied().max().unwrap_or(0);
        let min = weights.iter().copied().min().unwrap_or(0);
        let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();

        if max > min && total > 0 {
            let mut position = sequence % total;
            let mut remaining = weights.to_vec();
            for _ in 0..max {
                for (index, weight) in remaining.iter_mut().enumerate() {
                    if *weight == 0 {
                        continue;
                    }
                    if position == 0 {
                        return index;
                    }
                    *weight -= 1;
                    position -= 1;
                }
            }
        }
        (sequence % weights.len() as u64) as usize
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn pick(&self, service_key: &str, candidates: &[Endpoint], _request_identity: &str) -> usize {
        let sequence = self.next_sequence(service_key);
        let weights = effective_weights(candidates, now_millis());
        Self::pick_weighted(&weights, sequence)
    }

    fn invalidate(&self, service_key: &str) {
        self.sequences.remove(service_key);
    }
}
