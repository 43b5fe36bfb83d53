//! Change notifications for collection writes.
//!
//! Providers hold an optional shared [`ChangeNotifier`] and report every
//! successful batch write through it, so screens showing a collection can
//! refresh after an import without the backup core knowing about them.

use std::sync::{Arc, Mutex, PoisonError};

/// What kind of batch write happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The collection was replaced wholesale.
    Replaced,
    /// Records were upserted into the collection.
    Merged,
}

/// A completed batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    /// Collection written.
    pub collection: String,
    /// Replace or merge.
    pub kind: ChangeKind,
    /// Number of records written.
    pub applied: usize,
}

/// Callback invoked for each change.
pub type ChangeListener = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Fan-out of [`CollectionChange`]s to subscribed listeners.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use trackline_store::{ChangeKind, ChangeNotifier, CollectionChange};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let notifier = ChangeNotifier::new();
/// let sink = Arc::clone(&seen);
/// notifier.subscribe(move |c| sink.lock().unwrap().push(c.collection.clone()));
///
/// notifier.notify(&CollectionChange {
///     collection: "goals".into(),
///     kind: ChangeKind::Replaced,
///     applied: 3,
/// });
/// assert_eq!(*seen.lock().unwrap(), vec!["goals".to_string()]);
/// ```
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Mutex<Vec<ChangeListener>>,
}

impl ChangeNotifier {
    /// Create a notifier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&CollectionChange) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Deliver `change` to every listener registered when the call starts.
    ///
    /// The lock is released before dispatch, so a listener may subscribe
    /// further listeners; those see the next change.
    pub fn notify(&self, change: &CollectionChange) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(change);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
