// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for `libdd-object-registry`.

use thiserror::Error;

/// Errors returned by the object registry.
///
/// The conflict variants mean that an invariant of the caller (unique object
/// id allocation, one registration per object) has already been broken. The
/// registry never resolves them by picking a side, so the operation that ran
/// into one must be aborted.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RegistryError {
    /// The null id was passed where a real object id is required.
    #[error("improper object id {0}: the null id never denotes an object")]
    ImproperObjectId(u64),

    /// The object id is already bound to a different live object.
    #[error("object id {object_id} is already registered for a different live object")]
    ObjectIdConflict {
        /// The object id that was requested.
        object_id: u64,
    },

    /// The object is already bound to a different object id.
    #[error(
        "object is already registered with object id {registered_object_id}, \
         cannot register it as {object_id}"
    )]
    ObjectConflict {
        /// The object id that was requested.
        object_id: u64,
        /// The object id the object is currently registered with.
        registered_object_id: u64,
    },

    /// The hash density is not a positive, finite number.
    #[error("invalid hash density {0}: must be positive and finite")]
    InvalidHashDensity(f32),

    /// A capacity of zero was requested.
    #[error("invalid capacity {0}: must be positive")]
    InvalidCapacity(u64),
}
