//! Weighted consistent hashing over a fixed set of buckets.
//!
//! Every bucket contributes `weight * REPLICATION_FACTOR` points, the point for
//! replica `i` being the hash of `"{label}-{i}"`. A key is owned by the first
//! point at or after its own hash, wrapping to the first point of the ring.
//!
//! Hash: CRC-32 (ISO-HDLC) followed by the murmur3 32-bit finalizer, so that
//! labels differing only in the replica suffix spread over the whole circle.
//! Two replicas landing on the same position keep the first writer (lowest
//! bucket index, then lowest replica index); the dropped point very slightly
//! skews the weight distribution.
//!
//! The ring is immutable. Membership changes require building a new ring.

use crate::error::Error;
use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::{btree_map::Entry, BTreeMap, HashSet};
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Ring points per unit of bucket weight.
pub const REPLICATION_FACTOR: u32 = 160;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Named, weighted routing target.
pub trait Bucket {
    fn label(&self) -> &str;

    fn weight(&self) -> u32 {
        1
    }
}

pub struct Ring<B> {
    points: Vec<(u32, usize)>,
    buckets: Vec<B>,
}

impl<B: Bucket> Ring<B> {
    /// Builds the ring. Fails on an empty bucket list, duplicate labels, or
    /// when no bucket has a positive weight.
    pub fn new(buckets: Vec<B>) -> Result<Self, Error> {
        if buckets.is_empty() {
            return Err(Error::empty_ring());
        }
        let mut labels = HashSet::with_capacity(buckets.len());
        for bucket in &buckets {
            if !labels.insert(bucket.label()) {
                return Err(Error::config(format!(
                    "duplicate bucket label '{}'",
                    bucket.label()
                )));
            }
        }

        let points = collect_points(buckets.iter().enumerate().flat_map(|(index, bucket)| {
            let replicas = bucket.weight().saturating_mul(REPLICATION_FACTOR);
            let label = bucket.label().to_owned();
            (0..replicas).map(move |i| (hash(format!("{}-{}", label, i).as_bytes()), index))
        }));
        if points.is_empty() {
            return Err(Error::empty_ring());
        }
        debug!(
            "hash ring built: {} buckets, {} points",
            buckets.len(),
            points.len()
        );
        Ok(Self { points, buckets })
    }

    /// Returns the bucket owning `key`.
    pub fn locate(&self, key: &[u8]) -> &B {
        &self.buckets[self.locate_index(key)]
    }

    pub fn locate_index(&self, key: &[u8]) -> usize {
        let h = hash(key);
        let pos = self.points.partition_point(|&(point, _)| point < h);
        let (_, index) = self.points.get(pos).unwrap_or(&self.points[0]);
        *index
    }

    pub fn buckets(&self) -> &[B] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn points_count(&self) -> usize {
        self.points.len()
    }

    pub fn into_buckets(self) -> Vec<B> {
        self.buckets
    }
}

impl<B: Bucket> Debug for Ring<B> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Ring")
            .field(
                "buckets",
                &self.buckets.iter().map(Bucket::label).collect::<Vec<_>>(),
            )
            .field("points", &self.points.len())
            .finish()
    }
}

/// Sorts points by position, keeping the first writer of every position.
fn collect_points(points: impl Iterator<Item = (u32, usize)>) -> Vec<(u32, usize)> {
    let mut sorted = BTreeMap::new();
    let mut collisions = 0_usize;
    for (point, index) in points {
        match sorted.entry(point) {
            Entry::Vacant(entry) => {
                entry.insert(index);
            }
            Entry::Occupied(_) => collisions += 1,
        }
    }
    if collisions > 0 {
        debug!("hash ring dropped {} colliding points", collisions);
    }
    sorted.into_iter().collect()
}

pub fn hash(data: &[u8]) -> u32 {
    let mut h = CRC32.checksum(data);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
