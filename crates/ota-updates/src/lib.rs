// SPDX-License-Identifier: MIT OR Apache-2.0
//! Update store and lifecycle engine.
//!
//! [`UpdateStore`] is the typed view over the object store: it knows the
//! file layout of an update prefix and nothing about HTTP.  On top of it,
//! [`LifecycleEngine`] drives the state machine — mint, begin-upload,
//! validate/dedup/commit, rollback, republish — and owns the head-selection
//! cache with its single-flight guard.
//!
//! The one rule everything here bends around: the `.check` sentinel is the
//! sole commit witness.  It is written last, and no reader ever considers
//! an update without it.

#![deny(unsafe_code)]

mod keys;
mod lifecycle;
mod store;

pub use keys::{
    CACHE_SCHEMA_VERSION, dashboard_branches_key, dashboard_runtime_versions_key,
    dashboard_updates_key, head_lock_key, last_update_key, manifest_key,
};
pub use lifecycle::{
    BeginUpload, BranchEnsurer, FinalizeOutcome, HEAD_CACHE_TTL, LifecycleEngine, fingerprint,
    update_uuid,
};
pub use store::{UpdateKind, UpdateMetadata, UpdateStore};
