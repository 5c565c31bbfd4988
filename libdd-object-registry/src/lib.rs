// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Registry of the objects a persistence engine has stored or loaded, keyed
//! both by object id and by object identity.
//!
//! The store side asks for the id of each object it visits and registers the
//! ones it has not seen, so that shared and cyclic references are written
//! once. The load side registers each object as soon as it is instantiated
//! and resolves references through it, so that a loaded graph has the same
//! sharing as the stored one.
//!
//! ```
//! use libdd_object_registry::ObjectRegistry;
//! use std::sync::Arc;
//!
//! let registry = ObjectRegistry::<String>::new();
//! let object = Arc::new(String::from("root"));
//!
//! assert_eq!(registry.register_object(100, &object), Ok(true));
//! assert_eq!(registry.lookup_object_id(&object), Some(100));
//! assert!(Arc::ptr_eq(&registry.lookup_object(100).unwrap(), &object));
//!
//! // The same value in another allocation is another object.
//! let copy = Arc::new(String::from("root"));
//! assert!(registry.register_object(100, &copy).is_err());
//! ```

mod config;
mod constants;
mod entry;
mod error;
mod registry;
mod statistics;
mod table;

pub use config::*;
pub use error::*;
pub use registry::*;
pub use statistics::*;
pub use table::BUCKET_GROWTH;

/// The object id that never denotes an object.
pub const NULL_ID: u64 = 0;

#[inline]
pub fn is_proper_id(object_id: u64) -> bool {
    object_id != NULL_ID
}
