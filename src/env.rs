//! The effect environment: copy-on-write typed reference slots.
//!
//! An [`Env`] travels with every run of an effect. Combinators that scope a
//! setting (`locally`, the masks, `provide_service`) write to a clone, so a
//! child's environment never leaks into its parent. Each [`EnvRef`] carries a
//! default, so lookups always succeed.

use crate::cancel::{CancelSource, CancelToken};
use crate::context::Context;
use crate::runtime::scheduler::SchedulerHandle;
use crate::types::Concurrency;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// A typed key into the environment, with a default value.
///
/// Const-constructible: the identifier is a `&'static str` and the default a
/// plain function pointer.
pub struct EnvRef<T> {
    id: &'static str,
    default: fn() -> T,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EnvRef<T> {
    /// Creates a reference key from a stable identifier and a default.
    #[must_use]
    pub const fn new(id: &'static str, default: fn() -> T) -> Self {
        Self {
            id,
            default,
            _marker: PhantomData,
        }
    }

    /// The reference's identifier.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Evaluates the reference's default value.
    #[must_use]
    pub fn default_value(&self) -> T {
        (self.default)()
    }
}

impl<T> Clone for EnvRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EnvRef<T> {}

impl<T> fmt::Debug for EnvRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvRef({})", self.id)
    }
}

fn default_interruptible() -> bool {
    true
}

fn default_concurrency() -> Concurrency {
    Concurrency::Bounded(1)
}

/// The service context of the running effect.
pub const CURRENT_CONTEXT: EnvRef<Context> = EnvRef::new("microfx/currentContext", Context::empty);

/// The cancel source owning the current region.
pub const CURRENT_CANCEL_SOURCE: EnvRef<CancelSource> =
    EnvRef::new("microfx/currentCancelSource", CancelSource::new);

/// The cancellation token the current region observes.
///
/// Always a token of some reachable source; an uninterruptible subtree
/// observes a fresh, never-aborted token.
pub const CURRENT_CANCEL_TOKEN: EnvRef<CancelToken> =
    EnvRef::new("microfx/currentCancelToken", CancelToken::detached);

/// The concurrency setting consulted by `Concurrency::Inherit`.
pub const CURRENT_CONCURRENCY: EnvRef<Concurrency> =
    EnvRef::new("microfx/currentConcurrency", default_concurrency);

/// Whether the current region observes cancellation.
pub const CURRENT_INTERRUPTIBLE: EnvRef<bool> =
    EnvRef::new("microfx/currentInterruptible", default_interruptible);

/// The scheduler driving timers and next-tick hops.
pub const CURRENT_SCHEDULER: EnvRef<SchedulerHandle> =
    EnvRef::new("microfx/currentScheduler", SchedulerHandle::wall);

/// A copy-on-write mapping of [`EnvRef`] keys to values.
#[derive(Clone)]
pub struct Env {
    slots: Rc<HashMap<&'static str, Rc<dyn Any>>>,
}

impl Env {
    /// An environment with every slot at its default.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            slots: Rc::new(HashMap::new()),
        }
    }

    /// The environment a runner seeds for a root effect.
    pub(crate) fn initial(scheduler: SchedulerHandle, source: CancelSource) -> Self {
        let mut slots: HashMap<&'static str, Rc<dyn Any>> = HashMap::new();
        slots.insert(CURRENT_SCHEDULER.id(), Rc::new(scheduler));
        slots.insert(CURRENT_CANCEL_TOKEN.id(), Rc::new(source.token()));
        slots.insert(CURRENT_CANCEL_SOURCE.id(), Rc::new(source));
        Self {
            slots: Rc::new(slots),
        }
    }

    /// Reads a reference, falling back to its default on an empty slot.
    #[must_use]
    pub fn get<T: Clone + 'static>(&self, env_ref: EnvRef<T>) -> T {
        self.slots
            .get(env_ref.id())
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| env_ref.default_value())
    }

    /// Returns an environment with `value` written under `env_ref`.
    ///
    /// The receiver is untouched; unchanged slots are shared.
    #[must_use]
    pub fn with<T: 'static>(&self, env_ref: EnvRef<T>, value: T) -> Self {
        let mut slots = (*self.slots).clone();
        slots.insert(env_ref.id(), Rc::new(value));
        Self {
            slots: Rc::new(slots),
        }
    }

    /// Structural version check: true if both handles share one map.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slots, &other.slots)
    }

    /// The current service context.
    #[must_use]
    pub fn context(&self) -> Context {
        self.get(CURRENT_CONTEXT)
    }

    /// The cancel source owning the current region.
    #[must_use]
    pub fn cancel_source(&self) -> CancelSource {
        self.get(CURRENT_CANCEL_SOURCE)
    }

    /// The cancellation token the current region observes.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.get(CURRENT_CANCEL_TOKEN)
    }

    /// The current concurrency setting.
    #[must_use]
    pub fn concurrency(&self) -> Concurrency {
        self.get(CURRENT_CONCURRENCY)
    }

    /// Whether the current region observes cancellation.
    #[must_use]
    pub fn interruptible(&self) -> bool {
        self.get(CURRENT_INTERRUPTIBLE)
    }

    /// The scheduler driving timers and next-tick hops.
    #[must_use]
    pub fn scheduler(&self) -> SchedulerHandle {
        self.get(CURRENT_SCHEDULER)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.slots.keys().collect();
        ids.sort_unstable();
        f.debug_tuple("Env").field(&ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn zero() -> u64 {
        0
    }

    const MARKER: EnvRef<u64> = EnvRef::new("test/marker", zero);

    #[test]
    fn lookup_always_succeeds() {
        let env = Env::empty();
        assert_eq!(env.get(MARKER), 0);
        assert!(env.interruptible());
        assert_eq!(env.concurrency(), Concurrency::Bounded(1));
        assert!(!env.cancel_token().is_aborted());
    }

    #[test]
    fn with_is_copy_on_write() {
        let base = Env::empty();
        let derived = base.with(MARKER, 9);
        assert_eq!(base.get(MARKER), 0);
        assert_eq!(derived.get(MARKER), 9);
        assert!(!base.same_version(&derived));
        assert!(base.same_version(&base.clone()));
    }

    #[test]
    fn initial_env_pairs_token_with_source() {
        let source = CancelSource::new();
        let env = Env::initial(SchedulerHandle::wall(), source.clone());
        source.abort();
        assert!(env.cancel_token().is_aborted());
        assert!(env.cancel_source().is_aborted());
    }

    proptest! {
        // A chain of writes never mutates an environment captured earlier.
        #[test]
        fn writes_preserve_ancestors(values in proptest::collection::vec(any::<u64>(), 1..8)) {
            let mut snapshots = vec![(Env::empty(), 0_u64)];
            for v in &values {
                let (prev, _) = snapshots.last().cloned().expect("nonempty");
                snapshots.push((prev.with(MARKER, *v), *v));
            }
            for (env, expected) in &snapshots {
                prop_assert_eq!(env.get(MARKER), *expected);
            }
        }
    }
}
