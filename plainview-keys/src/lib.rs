//! Wrapped-DEK registry and lifecycle for Plainview.
//!
//! A user's data encryption key is persisted only wrapped inside a cipher
//! envelope, one row per `(user, provider-kind, key-id)`. This crate finds
//! or creates that row, unwraps it through the active crypto provider, and
//! holds the unwrapped key in a session-scoped slot that is dropped on
//! lock or sign-out.

mod error;
mod lifecycle;
mod registry;

pub use error::{KeyError, KeyResult};
pub use lifecycle::{DekLifecycle, KeySession};
pub use registry::{DEFAULT_KEY_ID, KeyRegistry, WrappedKeyRecord};
