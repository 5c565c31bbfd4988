// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bucket occupancy statistics, used to tune the hash density.

use crate::table::Bucket;
use serde::Serialize;

/// Number of slots whose bucket holds `length` live entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct BucketDistribution {
    pub length: usize,
    pub slots: usize,
}

/// Occupancy of one of the registry's tables.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HashStatistics {
    pub hash_length: usize,
    /// Registry size, orphans included.
    pub size: u64,
    pub hash_density: f32,
    pub longest_bucket: usize,
    /// Sorted ascending by bucket length, with an element for every length
    /// from zero to `longest_bucket`.
    pub distribution: Vec<BucketDistribution>,
}

impl HashStatistics {
    pub(crate) fn of_table<T: ?Sized>(table: &[Bucket<T>], size: u64, hash_density: f32) -> Self {
        let mut counts: Vec<usize> = vec![0];
        for bucket in table {
            let length = bucket.iter().filter(|e| e.is_live()).count();
            if length >= counts.len() {
                counts.resize(length + 1, 0);
            }
            counts[length] += 1;
        }
        let distribution: Vec<BucketDistribution> = counts
            .into_iter()
            .enumerate()
            .map(|(length, slots)| BucketDistribution { length, slots })
            .collect();
        Self {
            hash_length: table.len(),
            size,
            hash_density,
            longest_bucket: distribution.len() - 1,
            distribution,
        }
    }

    /// Average live entries per non-empty slot.
    pub fn average_bucket_length(&self) -> f64 {
        let (entries, used) = self
            .distribution
            .iter()
            .filter(|d| d.length > 0)
            .fold((0usize, 0usize), |(entries, used), d| {
                (entries + d.length * d.slots, used + d.slots)
            });
        if used == 0 {
            0.0
        } else {
            entries as f64 / used as f64
        }
    }
}

/// Statistics for both tables of a registry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegistryStatistics {
    pub per_object_ids: HashStatistics,
    pub per_objects: HashStatistics,
}
