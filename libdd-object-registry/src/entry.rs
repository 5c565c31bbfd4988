// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::hash::BuildHasher;
use std::fmt;
use std::sync::{Arc, Weak};

pub type IdentityHasher = core::hash::BuildHasherDefault<rustc_hash::FxHasher>;

/// Address of the object's payload, used as its identity.
#[inline]
pub(crate) fn identity_of<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).cast::<()>() as usize
}

/// Folds the Fx hash of an address into 32 bits. Fx keeps the trailing zeros
/// of aligned addresses in the low bits, so the high half is mixed in before
/// the tables mask it.
#[inline]
pub(crate) fn identity_hash(address: usize) -> u32 {
    let hash = IdentityHasher::default().hash_one(address);
    (hash ^ (hash >> 32)) as u32
}

/// One association between an object id and an object.
///
/// The identity token and its hash are captured at registration time and
/// never recomputed. The `Weak` keeps the allocation behind the address
/// reserved, so no other object can show up at the same address while the
/// entry is indexed, even after the object itself has been dropped.
pub(crate) struct Entry<T: ?Sized> {
    pub(crate) object_id: u64,
    object: Weak<T>,
    address: usize,
    pub(crate) identity_hash: u32,
}

impl<T: ?Sized> Entry<T> {
    pub(crate) fn new(object_id: u64, object: &Arc<T>) -> Self {
        let address = identity_of(object);
        Self {
            object_id,
            object: Arc::downgrade(object),
            address,
            identity_hash: identity_hash(address),
        }
    }

    /// Whether the object can still be resolved. The answer may be stale by
    /// the time the caller acts on it when the last strong holder is on
    /// another thread.
    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.object.strong_count() > 0
    }

    #[inline]
    pub(crate) fn is_orphan(&self) -> bool {
        !self.is_live()
    }

    /// True if this live entry denotes the object at `address`.
    #[inline]
    pub(crate) fn refers_to(&self, address: usize) -> bool {
        self.address == address && self.is_live()
    }

    #[inline]
    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.object.upgrade()
    }
}

impl<T: ?Sized> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("object_id", &self.object_id)
            .field("identity_hash", &self.identity_hash)
            .field("live", &self.is_live())
            .finish()
    }
}
