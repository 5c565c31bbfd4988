// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::IdentityHasher;
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

/// Objects that survive [`crate::ObjectRegistry::clear`] and
/// [`crate::ObjectRegistry::truncate`].
///
/// Constants are held strongly. While they are being registered they live in
/// a map ("hot"); once the registry rebuilds or resets, registration is
/// assumed to be over and they are compacted into two slices ("cold"). A
/// later registration turns the store hot again.
pub(crate) enum Constants<T: ?Sized> {
    Hot(HashMap<u64, Arc<T>, IdentityHasher>),
    Cold {
        object_ids: Box<[u64]>,
        objects: Box<[Arc<T>]>,
    },
}

impl<T: ?Sized> Default for Constants<T> {
    fn default() -> Self {
        Self::Hot(HashMap::default())
    }
}

impl<T: ?Sized> Constants<T> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Hot(map) => map.len(),
            Self::Cold { object_ids, .. } => object_ids.len(),
        }
    }

    pub(crate) fn is_hot(&self) -> bool {
        matches!(self, Self::Hot(_))
    }

    pub(crate) fn insert(&mut self, object_id: u64, object: Arc<T>) {
        match self {
            Self::Hot(map) => {
                map.insert(object_id, object);
            }
            Self::Cold {
                object_ids,
                objects,
            } => {
                let mut map =
                    HashMap::with_capacity_and_hasher(object_ids.len() + 1, Default::default());
                for (id, constant) in object_ids.iter().zip(objects.iter()) {
                    map.insert(*id, constant.clone());
                }
                map.insert(object_id, object);
                *self = Self::Hot(map);
            }
        }
    }

    pub(crate) fn ensure_cold(&mut self) {
        let Self::Hot(map) = self else {
            return;
        };
        let (object_ids, objects): (Vec<u64>, Vec<Arc<T>>) = map.drain().unzip();
        *self = Self::Cold {
            object_ids: object_ids.into_boxed_slice(),
            objects: objects.into_boxed_slice(),
        };
    }

    pub(crate) fn iter(&self) -> Box<dyn Iterator<Item = (u64, &Arc<T>)> + '_> {
        match self {
            Self::Hot(map) => Box::new(map.iter().map(|(id, object)| (*id, object))),
            Self::Cold {
                object_ids,
                objects,
            } => Box::new(object_ids.iter().copied().zip(objects.iter())),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Constants<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constants")
            .field("hot", &self.is_hot())
            .field("len", &self.len())
            .finish()
    }
}
