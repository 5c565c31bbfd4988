// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sizing configuration for the object registry.

use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Average number of entries per hash slot. Values within `[0.75; 2.0]` are
/// reasonable; lower values trade memory for shorter buckets.
pub const DEFAULT_HASH_DENSITY: f32 = 1.0;

pub const DEFAULT_MINIMUM_CAPACITY: u64 = 1;

/// Largest hash length the tables are ever resized to. Once reached, the
/// registry keeps accepting entries by lengthening buckets instead.
pub const MAX_HASH_LENGTH: usize = 1 << 30;

/// Configuration of an [`crate::ObjectRegistry`].
///
/// The minimum capacity is the number of entries the registry is sized for
/// without resizing, and also the floor it never shrinks below.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub hash_density: f32,
    pub minimum_capacity: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hash_density: DEFAULT_HASH_DENSITY,
            minimum_capacity: DEFAULT_MINIMUM_CAPACITY,
        }
    }
}

impl RegistryConfig {
    pub fn with_hash_density(mut self, hash_density: f32) -> Self {
        self.hash_density = hash_density;
        self
    }

    pub fn with_minimum_capacity(mut self, minimum_capacity: u64) -> Self {
        self.minimum_capacity = minimum_capacity;
        self
    }

    /// Checks both values, returning the config unchanged if they are usable.
    pub fn validate(self) -> Result<Self, RegistryError> {
        validate_hash_density(self.hash_density)?;
        validate_capacity(self.minimum_capacity)?;
        Ok(self)
    }

    /// Default configuration overridden by `DD_OBJECT_REGISTRY_*` environment
    /// variables. Values that fail to parse or validate are ignored.
    pub fn from_env() -> Self {
        FromEnv::config_with(|name| env::var(name).ok())
    }

    /// Smallest power-of-two hash length able to hold `capacity` entries at
    /// this density.
    pub(crate) fn required_hash_length(&self, capacity: u64) -> usize {
        let slots = (capacity as f64 / self.hash_density as f64).ceil();
        if slots >= MAX_HASH_LENGTH as f64 {
            return MAX_HASH_LENGTH;
        }
        (slots as usize).max(1).next_power_of_two()
    }

    /// Hash length the tables never shrink below.
    pub(crate) fn floor_hash_length(&self) -> usize {
        self.required_hash_length(self.minimum_capacity)
    }

    /// Entry count above which tables of `hash_length` are grown.
    pub(crate) fn capacity_high(&self, hash_length: usize) -> u64 {
        if hash_length >= MAX_HASH_LENGTH {
            return u64::MAX;
        }
        (hash_length as f64 * self.hash_density as f64) as u64
    }

    /// Entry count below which tables of `hash_length` are shrunk. Zero at
    /// the floor.
    pub(crate) fn capacity_low(&self, hash_length: usize) -> u64 {
        if hash_length <= self.floor_hash_length() {
            return 0;
        }
        ((hash_length / 2) as f64 * self.hash_density as f64) as u64
    }
}

pub fn is_valid_hash_density(hash_density: f32) -> bool {
    hash_density > 0.0 && hash_density.is_finite()
}

pub fn validate_hash_density(hash_density: f32) -> Result<f32, RegistryError> {
    if is_valid_hash_density(hash_density) {
        Ok(hash_density)
    } else {
        Err(RegistryError::InvalidHashDensity(hash_density))
    }
}

pub fn validate_capacity(capacity: u64) -> Result<u64, RegistryError> {
    if capacity > 0 {
        Ok(capacity)
    } else {
        Err(RegistryError::InvalidCapacity(capacity))
    }
}

struct FromEnv;

impl FromEnv {
    const DD_OBJECT_REGISTRY_HASH_DENSITY: &'static str = "DD_OBJECT_REGISTRY_HASH_DENSITY";
    const DD_OBJECT_REGISTRY_MINIMUM_CAPACITY: &'static str =
        "DD_OBJECT_REGISTRY_MINIMUM_CAPACITY";

    fn hash_density(var: &impl Fn(&str) -> Option<String>) -> Option<f32> {
        let raw = var(Self::DD_OBJECT_REGISTRY_HASH_DENSITY)?;
        match raw.trim().parse::<f32>().ok().filter(|d| is_valid_hash_density(*d)) {
            Some(density) => Some(density),
            None => {
                debug!(
                    value = raw.as_str(),
                    "Ignoring invalid {}",
                    Self::DD_OBJECT_REGISTRY_HASH_DENSITY
                );
                None
            }
        }
    }

    fn minimum_capacity(var: &impl Fn(&str) -> Option<String>) -> Option<u64> {
        let raw = var(Self::DD_OBJECT_REGISTRY_MINIMUM_CAPACITY)?;
        match raw.trim().parse::<u64>().ok().filter(|c| *c > 0) {
            Some(capacity) => Some(capacity),
            None => {
                debug!(
                    value = raw.as_str(),
                    "Ignoring invalid {}",
                    Self::DD_OBJECT_REGISTRY_MINIMUM_CAPACITY
                );
                None
            }
        }
    }

    fn config_with(var: impl Fn(&str) -> Option<String>) -> RegistryConfig {
        let default = RegistryConfig::default();
        RegistryConfig {
            hash_density: Self::hash_density(&var).unwrap_or(default.hash_density),
            minimum_capacity: Self::minimum_capacity(&var).unwrap_or(default.minimum_capacity),
        }
    }
}
