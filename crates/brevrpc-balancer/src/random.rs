use rand::Rng;

use crate::endpoint::{effective_weights, now_millis, Endpoint};
use crate::load_balancer::LoadBalancer;

/// Weighted random selection.
///
/// Equal weights fall back to a uniform draw; otherwise an offset drawn from
/// `[0, total)` walks down the weight list until it drops below the current
/// candidate's weight.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn pick_weighted<R: Rng + ?Sized>(weights: &[u32], rng: &mut R) -> usize {
        let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
        let same_weight = weights.windows(2).all(|pair| pair[0] == pair[1]);

        if total > 0 && !same_weight {
            let mut offset = rng.gen_range(0..total);
            for (index, weight) in weights.iter().enumerate() {
                let weight = u64::from(*weight);
                if offset < weight {
                    return index;
                }
                offset -= weight;
            }
        }
        rng.gen_range(0..weights.len())
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn pick(&self, _service_key: &str, candidates: &[Endpoint], _request_identity: &str) -> usize {
        let weights = effective_weights(candidates, now_millis());
        Self::pick_weighted(&weights, &mut rand::thread_rng())
    }
}
