//! Service context: a copy-on-write heterogeneous map of tagged services.
//!
//! A [`Tag`] is a typed handle onto a service slot: a stable identifier
//! string plus a phantom service type. Carrying services in an explicit
//! context (rather than globals) keeps authority visible at the call site.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// A typed key for a service in a [`Context`].
///
/// Two tags with the same identifier address the same slot; the service type
/// is checked at lookup.
pub struct Tag<S> {
    id: &'static str,
    _marker: PhantomData<fn() -> S>,
}

impl<S> Tag<S> {
    /// Creates a tag from a stable identifier string.
    #[must_use]
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The tag's identifier.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }
}

impl<S> Clone for Tag<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Tag<S> {}

impl<S> fmt::Debug for Tag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.id)
    }
}

/// An immutable mapping of tags to services.
///
/// Writes return a new context sharing unchanged entries; existing handles
/// never observe later additions.
#[derive(Clone)]
pub struct Context {
    entries: Rc<HashMap<&'static str, Rc<dyn Any>>>,
}

impl Context {
    /// The empty context.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Rc::new(HashMap::new()),
        }
    }

    /// Returns a context with `service` added under `tag`.
    #[must_use]
    pub fn add<S: 'static>(&self, tag: Tag<S>, service: S) -> Self {
        self.add_shared(tag, Rc::new(service))
    }

    /// Returns a context with an already-shared `service` added under `tag`.
    #[must_use]
    pub fn add_shared<S: 'static>(&self, tag: Tag<S>, service: Rc<S>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(tag.id(), service as Rc<dyn Any>);
        Self {
            entries: Rc::new(entries),
        }
    }

    /// Looks up the service registered under `tag`.
    ///
    /// Returns `None` when the slot is empty or holds a different type.
    #[must_use]
    pub fn get<S: 'static>(&self, tag: Tag<S>) -> Option<Rc<S>> {
        let entry = self.entries.get(tag.id())?;
        Rc::clone(entry).downcast::<S>().ok()
    }

    /// Merges two contexts; entries in `other` win on identifier collision.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if self.entries.is_empty() {
            return other.clone();
        }
        let mut entries = (*self.entries).clone();
        for (id, service) in other.entries.iter() {
            entries.insert(id, Rc::clone(service));
        }
        Self {
            entries: Rc::new(entries),
        }
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.keys().collect();
        ids.sort_unstable();
        f.debug_tuple("Context").field(&ids).finish()
    }
}
