// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The two hash tables of the registry and the rehashing that resizes them.
//!
//! Both tables have the same power-of-two length. An entry lives in exactly
//! one bucket of each: `by_oid` indexed by its object id, `by_ref` indexed by
//! its identity hash. Buckets are plain vectors of shared entries which only
//! grow, by [`BUCKET_GROWTH`] slots at a time; they are rebuilt wholesale by
//! [`HashTables::rebuild`], which is also where orphaned entries get dropped.

use crate::entry::Entry;
use std::sync::Arc;

/// Number of slots a full bucket grows by.
pub const BUCKET_GROWTH: usize = 4;

pub(crate) type Bucket<T> = Vec<Arc<Entry<T>>>;

fn new_table<T: ?Sized>(hash_length: usize) -> Vec<Bucket<T>> {
    let mut table = Vec::with_capacity(hash_length);
    table.resize_with(hash_length, Vec::new);
    table
}

#[inline]
fn push<T: ?Sized>(bucket: &mut Bucket<T>, entry: Arc<Entry<T>>) {
    if bucket.len() == bucket.capacity() {
        bucket.reserve_exact(BUCKET_GROWTH);
    }
    bucket.push(entry);
}

/// Removes `entry` (by pointer) from `bucket`, returning whether it was found.
fn remove<T: ?Sized>(bucket: &mut Bucket<T>, entry: &Arc<Entry<T>>) -> bool {
    match bucket.iter().position(|e| Arc::ptr_eq(e, entry)) {
        Some(index) => {
            bucket.swap_remove(index);
            true
        }
        None => false,
    }
}

#[derive(Debug)]
pub(crate) struct HashTables<T: ?Sized> {
    by_oid: Vec<Bucket<T>>,
    by_ref: Vec<Bucket<T>>,
    range: usize,
}

impl<T: ?Sized> HashTables<T> {
    pub(crate) fn new(hash_length: usize) -> Self {
        debug_assert!(hash_length.is_power_of_two());
        Self {
            by_oid: new_table(hash_length),
            by_ref: new_table(hash_length),
            range: hash_length - 1,
        }
    }

    #[inline]
    pub(crate) fn hash_length(&self) -> usize {
        self.range + 1
    }

    #[inline]
    fn oid_index(&self, object_id: u64) -> usize {
        (object_id as usize) & self.range
    }

    #[inline]
    fn ref_index(&self, identity_hash: u32) -> usize {
        (identity_hash as usize) & self.range
    }

    #[inline]
    pub(crate) fn oid_bucket(&self, object_id: u64) -> &Bucket<T> {
        &self.by_oid[self.oid_index(object_id)]
    }

    #[inline]
    pub(crate) fn ref_bucket(&self, identity_hash: u32) -> &Bucket<T> {
        &self.by_ref[self.ref_index(identity_hash)]
    }

    /// The entry indexed under `object_id`, orphaned or not.
    pub(crate) fn find_by_oid(&self, object_id: u64) -> Option<&Arc<Entry<T>>> {
        self.oid_bucket(object_id)
            .iter()
            .find(|e| e.object_id == object_id)
    }

    /// The live entry whose identity token is `address`.
    pub(crate) fn find_by_ref(&self, address: usize, identity_hash: u32) -> Option<&Arc<Entry<T>>> {
        self.ref_bucket(identity_hash)
            .iter()
            .find(|e| e.refers_to(address))
    }

    /// Indexes a new entry in both tables. The caller accounts for size.
    pub(crate) fn insert(&mut self, entry: Entry<T>) {
        let entry = Arc::new(entry);
        let oid_index = self.oid_index(entry.object_id);
        let ref_index = self.ref_index(entry.identity_hash);
        push(&mut self.by_ref[ref_index], entry.clone());
        push(&mut self.by_oid[oid_index], entry);
    }

    /// Puts `entry` in place of the entry already indexed under the same
    /// object id, moving it to its new identity bucket. Returns false if no
    /// entry had that object id.
    pub(crate) fn replace(&mut self, entry: Entry<T>) -> bool {
        let oid_index = self.oid_index(entry.object_id);
        let Some(slot) = self.by_oid[oid_index]
            .iter()
            .position(|e| e.object_id == entry.object_id)
        else {
            return false;
        };

        let entry = Arc::new(entry);
        let previous = std::mem::replace(&mut self.by_oid[oid_index][slot], entry.clone());
        let previous_ref_index = self.ref_index(previous.identity_hash);
        remove(&mut self.by_ref[previous_ref_index], &previous);
        let ref_index = self.ref_index(entry.identity_hash);
        push(&mut self.by_ref[ref_index], entry);
        true
    }

    /// Empties every bucket while keeping the table length and the bucket
    /// allocations.
    pub(crate) fn clear(&mut self) {
        self.by_oid.iter_mut().for_each(Vec::clear);
        self.by_ref.iter_mut().for_each(Vec::clear);
    }

    /// Every entry exactly once, in `by_oid` order.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<Entry<T>>> {
        self.by_oid.iter().flatten()
    }

    pub(crate) fn by_oid(&self) -> &[Bucket<T>] {
        &self.by_oid
    }

    pub(crate) fn by_ref(&self) -> &[Bucket<T>] {
        &self.by_ref
    }

    /// Rebuilds both tables at `hash_length`, keeping only live entries.
    ///
    /// Only `by_oid` is walked so that each entry is visited once. Returns the
    /// number of surviving entries, which becomes the registry's size.
    pub(crate) fn rebuild(&mut self, hash_length: usize) -> u64 {
        debug_assert!(hash_length.is_power_of_two());
        let old = std::mem::replace(self, Self::new(hash_length));
        let mut survivors = 0u64;
        for entry in old.by_oid.into_iter().flatten() {
            if entry.is_orphan() {
                continue;
            }
            let oid_index = self.oid_index(entry.object_id);
            let ref_index = self.ref_index(entry.identity_hash);
            push(&mut self.by_ref[ref_index], entry.clone());
            push(&mut self.by_oid[oid_index], entry);
            survivors += 1;
        }
        survivors
    }

    /// Drops orphaned entries from both tables without resizing them.
    /// Returns how many entries were dropped.
    ///
    /// An object can stop resolving between the two passes, so the count
    /// comes from `by_oid` alone and `by_ref` is swept for entries that are no
    /// longer indexed there instead of being judged on its own.
    pub(crate) fn sweep_orphans(&mut self) -> u64 {
        let mut removed = 0u64;
        for bucket in self.by_oid.iter_mut() {
            let before = bucket.len();
            bucket.retain(|e| e.is_live());
            removed += (before - bucket.len()) as u64;
        }
        if removed > 0 {
            // Entries still referenced from by_oid have a strong count of 2.
            for bucket in self.by_ref.iter_mut() {
                bucket.retain(|e| Arc::strong_count(e) > 1);
            }
        }
        removed
    }
}
