//! Consistent hashing with virtual nodes.
//!
//! Every endpoint owns [`VIRTUAL_NODES`] points on a 32-bit ring: 40 MD5
//! digests of `identity + i`, each split into four little-endian 4-byte
//! windows. A request lands on the first point at or after the hash of its
//! identity, wrapping around to the start of the ring.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use md5::{Digest, Md5};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::load_balancer::LoadBalancer;

pub const VIRTUAL_NODES: usize = 160;
const DIGESTS_PER_ENDPOINT: usize = VIRTUAL_NODES / 4;

fn md5(input: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(input.as_bytes()));
    out
}

/// Ring position taken from the `slice`-th 4-byte window of a digest.
fn ring_point(digest: &[u8; 16], slice: usize) -> u32 {
    let start = slice * 4;
    u32::from_le_bytes([
        digest[start],
        digest[start + 1],
        digest[start + 2],
        digest[start + 3],
    ])
}

/// Candidate identities in a stable order, paired with their index in the
/// caller's slice.
fn ordered_identities(candidates: &[Endpoint]) -> Vec<(String, usize)> {
    let mut order: Vec<(String, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(i, endpoint)| (endpoint.to_string(), i))
        .collect();
    order.sort();
    order
}

fn fingerprint(order: &[(String, usize)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (identity, _) in order {
        identity.hash(&mut hasher);
    }
    hasher.finish()
}

/// Immutable ring for one candidate set. Values are ranks into the sorted
/// identity list the ring was built from.
#[derive(Debug)]
struct HashRing {
    fingerprint: u64,
    points: BTreeMap<u32, usize>,
}

impl HashRing {
    fn build(order: &[(String, usize)], fingerprint: u64) -> Self {
        let mut points = BTreeMap::new();
        for (rank, (identity, _)) in order.iter().enumerate() {
            for i in 0..DIGESTS_PER_ENDPOINT {
                let digest = md5(&format!("{}{}", identity, i));
                for slice in 0..4 {
                    points.insert(ring_point(&digest, slice), rank);
                }
            }
        }
        Self { fingerprint, points }
    }

    fn locate(&self, request_identity: &str) -> Option<usize> {
        let hash = ring_point(&md5(request_identity), 0);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, rank)| *rank)
    }
}

/// Consistent hash strategy with one cached ring per service key.
#[derive(Debug, Default)]
pub struct ConsistentHashLoadBalancer {
    rings: DashMap<String, Arc<HashRing>>,
    rebuild: Mutex<()>,
}

impl ConsistentHashLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, service_key: &str, fingerprint: u64) -> Option<Arc<HashRing>> {
        self.rings
            .get(service_key)
            .filter(|ring| ring.fingerprint == fingerprint)
            .map(|ring| Arc::clone(&ring))
    }

    fn ring_for(&self, service_key: &str, order: &[(String, usize)]) -> Arc<HashRing> {
        let fingerprint = fingerprint(order);
        if let Some(ring) = self.cached(service_key, fingerprint) {
            return ring;
        }

        let _guard = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ring) = self.cached(service_key, fingerprint) {
            return ring;
        }

        debug!("Rebuilding hash ring for {} ({} endpoints)", service_key, order.len());
        let ring = Arc::new(HashRing::build(order, fingerprint));
        self.rings.insert(service_key.to_string(), Arc::clone(&ring));
        ring
    }

    #[cfg(test)]
    fn ring_size(&self, service_key: &str) -> Option<usize> {
        self.rings.get(service_key).map(|ring| ring.points.len())
    }
}

impl LoadBalancer for ConsistentHashLoadBalancer {
    fn pick(&self, service_key: &str, candidates: &[Endpoint], request_identity: &str) -> usize {
        let order = ordered_identities(candidates);
        let ring = self.ring_for(service_key, &order);
        ring.locate(request_identity)
            .and_then(|rank| order.get(rank))
            .map(|(_, index)| *index)
            .unwrap_or(0)
    }

    fn invalidate(&self, service_key: &str) {
        self.rings.remove(service_key);
    }
}
