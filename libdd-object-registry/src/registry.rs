// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::{validate_capacity, validate_hash_density, RegistryConfig, MAX_HASH_LENGTH};
use crate::constants::Constants;
use crate::entry::{identity_hash, identity_of, Entry};
use crate::statistics::{HashStatistics, RegistryStatistics};
use crate::table::HashTables;
use crate::{is_proper_id, RegistryError};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Bidirectional mapping between live objects and their object ids.
///
/// Objects are held weakly: registering an object does not keep it alive.
/// Once the last [`Arc`] to a registered object is dropped, its entry becomes
/// an orphan which lookups ignore and which is reclaimed by the next rebuild,
/// [`ObjectRegistry::consolidate`] or [`ObjectRegistry::clean_up`].
/// Constants registered with [`ObjectRegistry::register_constant`] are the
/// exception: they are held strongly and survive [`ObjectRegistry::clear`]
/// and [`ObjectRegistry::truncate`].
///
/// Objects are identified by the address of their `Arc` allocation, never by
/// value: two equal values in different allocations are different objects.
///
/// Every operation takes one registry-wide lock for its whole duration.
pub struct ObjectRegistry<T: ?Sized = dyn Any + Send + Sync> {
    state: Mutex<RegistryState<T>>,
}

struct RegistryState<T: ?Sized> {
    tables: HashTables<T>,
    config: RegistryConfig,
    /// Size above which the tables grow.
    capacity: u64,
    /// Live and orphaned entries.
    size: u64,
    constants: Constants<T>,
}

impl<T: ?Sized> Default for ObjectRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ObjectRegistry<T> {
    pub fn new() -> Self {
        Self::from_valid_config(RegistryConfig::default())
    }

    pub fn try_with_config(config: RegistryConfig) -> Result<Self, RegistryError> {
        Ok(Self::from_valid_config(config.validate()?))
    }

    fn from_valid_config(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState::new(config)),
        }
    }

    /// A new, empty registry with the same configuration.
    pub fn empty_clone(&self) -> Self {
        Self::from_valid_config(self.state.lock().config)
    }

    pub fn config(&self) -> RegistryConfig {
        self.state.lock().config
    }

    /// Number of slots in each of the two tables.
    pub fn hash_length(&self) -> usize {
        self.state.lock().tables.hash_length()
    }

    pub fn hash_density(&self) -> f32 {
        self.state.lock().config.hash_density
    }

    pub fn minimum_capacity(&self) -> u64 {
        self.state.lock().config.minimum_capacity
    }

    /// Number of entries the tables hold before they are grown.
    pub fn capacity(&self) -> u64 {
        self.state.lock().capacity
    }

    /// Number of entries, including orphans that have not been swept yet.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().size == 0
    }

    pub fn constant_count(&self) -> usize {
        self.state.lock().constants.len()
    }

    /// Returns whether the tables were rebuilt.
    pub fn set_hash_density(&self, hash_density: f32) -> Result<bool, RegistryError> {
        let mut state = self.state.lock();
        let config = state.config.with_hash_density(validate_hash_density(hash_density)?);
        Ok(state.apply_config(config))
    }

    /// Returns whether the tables were rebuilt.
    pub fn set_minimum_capacity(&self, minimum_capacity: u64) -> Result<bool, RegistryError> {
        let mut state = self.state.lock();
        let config = state
            .config
            .with_minimum_capacity(validate_capacity(minimum_capacity)?);
        Ok(state.apply_config(config))
    }

    /// Validates both values before changing anything. Returns whether the
    /// tables were rebuilt.
    pub fn set_configuration(&self, config: RegistryConfig) -> Result<bool, RegistryError> {
        let config = config.validate()?;
        Ok(self.state.lock().apply_config(config))
    }

    /// Grows the tables so that `desired_capacity` entries fit without a
    /// rebuild. Returns whether the tables were rebuilt.
    pub fn ensure_capacity(&self, desired_capacity: u64) -> Result<bool, RegistryError> {
        let desired_capacity = validate_capacity(desired_capacity)?;
        Ok(self.state.lock().ensure_capacity(desired_capacity))
    }

    /// Whether an entry exists for `object_id`. Orphans count, since this
    /// does not resolve the object.
    pub fn contains_object_id(&self, object_id: u64) -> bool {
        self.state.lock().tables.find_by_oid(object_id).is_some()
    }

    /// The object id `object` is registered with, or `None`.
    pub fn lookup_object_id(&self, object: &Arc<T>) -> Option<u64> {
        self.state.lock().lookup_object_id(identity_of(object))
    }

    /// The live object registered for `object_id`, or `None`, also when the
    /// entry is an orphan.
    pub fn lookup_object(&self, object_id: u64) -> Option<Arc<T>> {
        self.state.lock().tables.find_by_oid(object_id)?.get()
    }

    /// True if `object_id` and `object` are registered with each other, or if
    /// neither of them is registered.
    pub fn is_valid(&self, object_id: u64, object: &Arc<T>) -> bool {
        self.validate(object_id, object).is_ok()
    }

    /// Like [`ObjectRegistry::is_valid`], reporting which side conflicts.
    pub fn validate(&self, object_id: u64, object: &Arc<T>) -> Result<(), RegistryError> {
        self.state.lock().check_consistency(object_id, identity_of(object))
    }

    /// Associates `object_id` with `object`.
    ///
    /// Returns `Ok(true)` if a new association was recorded, which includes
    /// taking over the orphaned entry of a dropped object, and `Ok(false)` if
    /// the pair was already registered. Fails without changing anything if
    /// `object_id` is the null id, is held by another live object, or if
    /// `object` is registered with another id.
    pub fn register_object(&self, object_id: u64, object: &Arc<T>) -> Result<bool, RegistryError> {
        check_proper_id(object_id)?;
        self.state.lock().add(object_id, object)
    }

    /// Like [`ObjectRegistry::register_object`], but if `object_id` already
    /// denotes another live object, that object is returned and `object` is
    /// not registered. Otherwise `object` itself is returned.
    ///
    /// Registering an object that already has another id still fails.
    pub fn optional_register_object(
        &self,
        object_id: u64,
        object: &Arc<T>,
    ) -> Result<Arc<T>, RegistryError> {
        check_proper_id(object_id)?;
        self.state.lock().add_get(object_id, object)
    }

    /// Registers `constant` like [`ObjectRegistry::register_object`] and, on
    /// success, keeps it alive and registered across
    /// [`ObjectRegistry::clear`] and [`ObjectRegistry::truncate`].
    pub fn register_constant(
        &self,
        object_id: u64,
        constant: &Arc<T>,
    ) -> Result<bool, RegistryError> {
        check_proper_id(object_id)?;
        let mut state = self.state.lock();
        let added = state.add(object_id, constant)?;
        state.constants.insert(object_id, constant.clone());
        Ok(added)
    }

    /// Calls `visitor` with every entry, passing `None` for orphans.
    ///
    /// The registry stays locked while the visitor runs, so it must not call
    /// back into this registry.
    pub fn iterate_entries(&self, mut visitor: impl FnMut(u64, Option<Arc<T>>)) {
        let state = self.state.lock();
        for entry in state.tables.entries() {
            visitor(entry.object_id, entry.get());
        }
    }

    /// The subset of `object_ids` that has an entry in the registry, in the
    /// given order.
    pub fn select_live_object_ids(&self, object_ids: impl IntoIterator<Item = u64>) -> Vec<u64> {
        let state = self.state.lock();
        object_ids
            .into_iter()
            .filter(|object_id| {
                let live = state.tables.find_by_oid(*object_id).is_some();
                trace!(object_id, live, "Checked object id against the registry");
                live
            })
            .collect()
    }

    /// Removes orphaned entries and shrinks the tables if they became too
    /// sparse. Returns whether the tables were rebuilt.
    pub fn consolidate(&self) -> bool {
        let mut state = self.state.lock();
        state.sweep_orphans();
        state.check_for_decrease()
    }

    /// Removes orphaned entries and shrinks the tables if they became too
    /// sparse. Returns the number of removed orphans.
    pub fn clean_up(&self) -> u64 {
        let mut state = self.state.lock();
        let removed = state.sweep_orphans();
        debug!(removed, size = state.size, "Cleaned up orphaned registry entries");
        state.check_for_decrease();
        removed
    }

    /// Removes every entry except the constants. The tables keep their
    /// length.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.constants.ensure_cold();
        state.tables.clear();
        state.size = 0;
        state.reregister_constants();
        debug!(constants = state.size, "Cleared object registry");
    }

    /// Removes every entry, constants included. The tables keep their length.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.tables.clear();
        state.size = 0;
        state.constants = Constants::default();
        debug!("Cleared object registry including constants");
    }

    /// Removes every entry except the constants and shrinks the tables to the
    /// minimum capacity, or to the constant count if that is larger.
    pub fn truncate(&self) {
        let mut state = self.state.lock();
        state.constants.ensure_cold();
        let capacity = (state.constants.len() as u64).max(state.config.minimum_capacity);
        state.reset(capacity);
        state.reregister_constants();
        debug!(
            hash_length = state.tables.hash_length(),
            constants = state.size,
            "Truncated object registry"
        );
    }

    /// Removes every entry, constants included, and shrinks the tables to
    /// the minimum capacity.
    pub fn truncate_all(&self) {
        let mut state = self.state.lock();
        let capacity = state.config.minimum_capacity;
        state.reset(capacity);
        state.constants = Constants::default();
        debug!(
            hash_length = state.tables.hash_length(),
            "Truncated object registry including constants"
        );
    }

    /// Bucket occupancy of both tables.
    pub fn create_hash_statistics(&self) -> RegistryStatistics {
        let state = self.state.lock();
        let density = state.config.hash_density;
        RegistryStatistics {
            per_object_ids: HashStatistics::of_table(state.tables.by_oid(), state.size, density),
            per_objects: HashStatistics::of_table(state.tables.by_ref(), state.size, density),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ObjectRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectRegistry")
            .field("hash_length", &state.tables.hash_length())
            .field("config", &state.config)
            .field("capacity", &state.capacity)
            .field("size", &state.size)
            .field("constants", &state.constants)
            .finish()
    }
}

fn check_proper_id(object_id: u64) -> Result<(), RegistryError> {
    if is_proper_id(object_id) {
        Ok(())
    } else {
        Err(RegistryError::ImproperObjectId(object_id))
    }
}

// Everything below runs with the registry lock held.
impl<T: ?Sized> RegistryState<T> {
    fn new(config: RegistryConfig) -> Self {
        let tables = HashTables::new(config.floor_hash_length());
        let capacity = config.capacity_high(tables.hash_length());
        Self {
            tables,
            config,
            capacity,
            size: 0,
            constants: Constants::default(),
        }
    }

    fn update_capacity(&mut self) {
        self.capacity = self.config.capacity_high(self.tables.hash_length());
    }

    /// Fresh, empty tables sized for `capacity` entries.
    fn reset(&mut self, capacity: u64) {
        self.tables = HashTables::new(self.config.required_hash_length(capacity));
        self.size = 0;
        self.update_capacity();
    }

    fn apply_config(&mut self, config: RegistryConfig) -> bool {
        self.config = config;
        self.update_capacity();
        if self.ensure_capacity(config.minimum_capacity) {
            return true;
        }
        if self.size > self.capacity {
            self.increase_storage();
            return true;
        }
        false
    }

    fn ensure_capacity(&mut self, desired_capacity: u64) -> bool {
        let required = self.config.required_hash_length(desired_capacity);
        if required <= self.tables.hash_length() {
            return false;
        }
        self.rebuild(required);
        true
    }

    fn lookup_object_id(&self, address: usize) -> Option<u64> {
        self.tables
            .find_by_ref(address, identity_hash(address))
            .map(|e| e.object_id)
    }

    fn check_consistency(&self, object_id: u64, address: usize) -> Result<(), RegistryError> {
        match self.lookup_object_id(address) {
            Some(registered) if registered == object_id => Ok(()),
            Some(registered_object_id) => Err(RegistryError::ObjectConflict {
                object_id,
                registered_object_id,
            }),
            None => match self.tables.find_by_oid(object_id) {
                Some(entry) if entry.is_live() => Err(RegistryError::ObjectIdConflict { object_id }),
                _ => Ok(()),
            },
        }
    }

    fn ensure_not_yet_registered(&self, object_id: u64, address: usize) -> Result<(), RegistryError> {
        match self.lookup_object_id(address) {
            Some(registered_object_id) => Err(RegistryError::ObjectConflict {
                object_id,
                registered_object_id,
            }),
            None => Ok(()),
        }
    }

    fn add(&mut self, object_id: u64, object: &Arc<T>) -> Result<bool, RegistryError> {
        let address = identity_of(object);
        if let Some(entry) = self.tables.find_by_oid(object_id) {
            if entry.refers_to(address) {
                return Ok(false);
            }
            if entry.is_live() {
                return Err(RegistryError::ObjectIdConflict { object_id });
            }
            self.ensure_not_yet_registered(object_id, address)?;
            self.reuse_orphan(object_id, object);
            return Ok(true);
        }
        self.ensure_not_yet_registered(object_id, address)?;
        self.put_new_entry(object_id, object);
        Ok(true)
    }

    fn add_get(&mut self, object_id: u64, object: &Arc<T>) -> Result<Arc<T>, RegistryError> {
        let address = identity_of(object);
        if let Some(entry) = self.tables.find_by_oid(object_id) {
            if let Some(registered) = entry.get() {
                return Ok(registered);
            }
            self.ensure_not_yet_registered(object_id, address)?;
            self.reuse_orphan(object_id, object);
            return Ok(object.clone());
        }
        self.ensure_not_yet_registered(object_id, address)?;
        self.put_new_entry(object_id, object);
        Ok(object.clone())
    }

    fn reuse_orphan(&mut self, object_id: u64, object: &Arc<T>) {
        let replaced = self.tables.replace(Entry::new(object_id, object));
        debug_assert!(replaced, "orphan for {object_id} vanished under the lock");
        trace!(object_id, "Reused orphaned registry entry");
    }

    fn put_new_entry(&mut self, object_id: u64, object: &Arc<T>) {
        self.tables.insert(Entry::new(object_id, object));
        self.size += 1;
        if self.size > self.capacity {
            self.increase_storage();
        }
    }

    fn reregister_constants(&mut self) {
        for (object_id, constant) in self.constants.iter() {
            self.tables.insert(Entry::new(object_id, constant));
            self.size += 1;
        }
        if self.size > self.capacity {
            self.increase_storage();
        }
    }

    fn increase_storage(&mut self) {
        let doubled = (self.tables.hash_length() << 1).min(MAX_HASH_LENGTH);
        let required = self.config.required_hash_length(self.size);
        self.rebuild(doubled.max(required));
        // Dropping orphans may have left the grown tables too sparse.
        self.check_for_decrease();
    }

    fn check_for_decrease(&mut self) -> bool {
        let hash_length = self.tables.hash_length();
        if self.size >= self.config.capacity_low(hash_length) {
            return false;
        }
        let target = self
            .config
            .required_hash_length(self.size)
            .max(self.config.floor_hash_length());
        if target >= hash_length {
            return false;
        }
        self.rebuild(target);
        true
    }

    fn rebuild(&mut self, hash_length: usize) {
        let previous_length = self.tables.hash_length();
        let previous_size = self.size;
        self.size = self.tables.rebuild(hash_length);
        self.update_capacity();
        debug!(
            previous_length,
            hash_length,
            size = self.size,
            orphans = previous_size.saturating_sub(self.size),
            "Rebuilt object registry tables"
        );
        // Constant registration is over once the registry is in use.
        self.constants.ensure_cold();
    }

    fn sweep_orphans(&mut self) -> u64 {
        let removed = self.tables.sweep_orphans();
        self.size -= removed;
        removed
    }
}
