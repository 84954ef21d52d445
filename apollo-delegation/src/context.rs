//! Caller context threaded through delegated calls.
//!
//! A [`Context`] is cheap to clone: clones share the same extensions. Its identity
//! ([`Context::id`]) scopes batch queues, so calls made with the same context to the same
//! endpoint may be merged.
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;

/// Non-serializable data attached to a [`Context`].
pub type Extensions = http::Extensions;

/// Context for a delegated call.
///
/// The caller creates one per outer request and passes it to every delegation made while
/// resolving that request.
#[derive(Clone, Debug)]
pub struct Context {
    id: Arc<str>,
    extensions: Arc<Mutex<Extensions>>,
}

impl Context {
    /// Create a new context.
    pub fn new() -> Self {
        Context {
            id: uuid::Uuid::new_v4().to_string().into(),
            extensions: Default::default(),
        }
    }

    /// Unique identifier of this context and all its clones.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Locks the extensions for interaction.
    ///
    /// The lock will be dropped once the closure completes.
    pub fn extensions_with_lock<T, F: FnOnce(ExtensionsGuard<'_>) -> T>(&self, func: F) -> T {
        func(ExtensionsGuard {
            guard: self.extensions.lock(),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            extensions: Arc::downgrade(&self.extensions),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks whether any clone of a [`Context`] is still alive.
#[derive(Clone, Debug)]
pub(crate) struct WeakContext {
    extensions: Weak<Mutex<Extensions>>,
}

impl WeakContext {
    pub(crate) fn is_alive(&self) -> bool {
        self.extensions.strong_count() > 0
    }
}

/// Exclusive access to a [`Context`]'s extensions.
pub struct ExtensionsGuard<'a> {
    guard: parking_lot::MutexGuard<'a, Extensions>,
}

impl Deref for ExtensionsGuard<'_> {
    type Target = Extensions;

    fn deref(&self) -> &Extensions {
        &self.guard
    }
}

impl DerefMut for ExtensionsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Extensions {
        &mut self.guard
    }
}
