//! Sequential and bounded-concurrent iteration.
//!
//! Both engines share the contract: outputs land at their input index, the
//! first failure wins and stops further starts, and already-started children
//! report before the aggregate settles. Pumping is trampolined with a
//! running flag so long chains of synchronously-resuming children iterate
//! instead of recursing.

use crate::cancel::{CancelSource, CancelToken, ListenerId};
use crate::effect::{guarded, Continuation, Effect};
use crate::env::{Env, CURRENT_CANCEL_TOKEN};
use crate::types::{Concurrency, Failure};
use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

/// Options for the `for_each` family.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForEachOptions {
    /// In-flight cap for the mappers. The default is sequential.
    pub concurrency: Concurrency,
}

impl ForEachOptions {
    /// Returns options with the given concurrency setting.
    #[must_use]
    pub const fn with_concurrency(concurrency: Concurrency) -> Self {
        Self { concurrency }
    }
}

/// Maps `f` over `items` sequentially, collecting outputs in input order.
///
/// On the first failure the remaining items are not started and the failure
/// propagates.
pub fn for_each<I, A, B, E, F>(items: I, f: F) -> Effect<Vec<B>, E>
where
    I: IntoIterator<Item = A>,
    A: Clone + 'static,
    B: 'static,
    E: 'static,
    F: Fn(A) -> Effect<B, E> + 'static,
{
    for_each_with(items, f, ForEachOptions::default())
}

/// Maps `f` over `items` with the configured concurrency, collecting outputs
/// at their input index.
pub fn for_each_with<I, A, B, E, F>(items: I, f: F, options: ForEachOptions) -> Effect<Vec<B>, E>
where
    I: IntoIterator<Item = A>,
    A: Clone + 'static,
    B: 'static,
    E: 'static,
    F: Fn(A) -> Effect<B, E> + 'static,
{
    iterate(items, f, options, false)
}

/// Like [`for_each_with`], discarding the outputs.
pub fn for_each_discard<I, A, B, E, F>(items: I, f: F, options: ForEachOptions) -> Effect<(), E>
where
    I: IntoIterator<Item = A>,
    A: Clone + 'static,
    B: 'static,
    E: 'static,
    F: Fn(A) -> Effect<B, E> + 'static,
{
    iterate(items, f, options, true).as_void()
}

fn iterate<I, A, B, E, F>(items: I, f: F, options: ForEachOptions, discard: bool) -> Effect<Vec<B>, E>
where
    I: IntoIterator<Item = A>,
    A: Clone + 'static,
    B: 'static,
    E: 'static,
    F: Fn(A) -> Effect<B, E> + 'static,
{
    let items: Rc<Vec<A>> = Rc::new(items.into_iter().collect());
    let f: Rc<dyn Fn(A) -> Effect<B, E>> = Rc::new(f);
    Effect::make(move |env, k| {
        let cap = effective_cap(options.concurrency, &env);
        if cap <= 1 {
            sequential(Rc::clone(&items), Rc::clone(&f), discard, env, k);
        } else {
            concurrent(Rc::clone(&items), Rc::clone(&f), cap, discard, env, k);
        }
    })
}

fn effective_cap(setting: Concurrency, env: &Env) -> usize {
    match setting.cap() {
        Some(cap) => cap,
        None => env.concurrency().cap().unwrap_or(1),
    }
}

struct Sequential<A, B, E> {
    items: Rc<Vec<A>>,
    f: Rc<dyn Fn(A) -> Effect<B, E>>,
    env: Env,
    discard: bool,
    index: Cell<usize>,
    results: RefCell<Vec<B>>,
    running: Cell<bool>,
    resumed_in_loop: Cell<bool>,
    done: Cell<bool>,
    k: Continuation<Vec<B>, E>,
}

fn sequential<A, B, E>(
    items: Rc<Vec<A>>,
    f: Rc<dyn Fn(A) -> Effect<B, E>>,
    discard: bool,
    env: Env,
    k: Continuation<Vec<B>, E>,
) where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    let capacity = if discard { 0 } else { items.len() };
    let state = Rc::new(Sequential {
        items,
        f,
        env,
        discard,
        index: Cell::new(0),
        results: RefCell::new(Vec::with_capacity(capacity)),
        running: Cell::new(false),
        resumed_in_loop: Cell::new(false),
        done: Cell::new(false),
        k,
    });
    pump_sequential(&state);
}

fn pump_sequential<A, B, E>(state: &Rc<Sequential<A, B, E>>)
where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    if state.running.get() {
        return;
    }
    state.running.set(true);
    loop {
        if state.done.get() {
            break;
        }
        let i = state.index.get();
        if i >= state.items.len() {
            state.done.set(true);
            let collected = mem::take(&mut *state.results.borrow_mut());
            state.k.resolve(Ok(collected));
            break;
        }
        state.index.set(i + 1);
        let item = state.items[i].clone();
        let child = match guarded(|| (state.f)(item)) {
            Ok(child) => child,
            Err(defect) => {
                state.done.set(true);
                state.k.resolve(Err(Failure::Unexpected(defect)));
                break;
            }
        };
        state.resumed_in_loop.set(false);
        let st = Rc::clone(state);
        child.run_with(
            state.env.clone(),
            Box::new(move |outcome| match outcome {
                Ok(value) => {
                    if !st.discard {
                        st.results.borrow_mut().push(value);
                    }
                    if st.running.get() {
                        st.resumed_in_loop.set(true);
                    } else {
                        pump_sequential(&st);
                    }
                }
                Err(failure) => {
                    st.done.set(true);
                    st.k.resolve(Err(failure));
                }
            }),
        );
        if !state.resumed_in_loop.get() {
            break;
        }
    }
    state.running.set(false);
}

struct Concurrent<A, B, E> {
    items: Rc<Vec<A>>,
    f: Rc<dyn Fn(A) -> Effect<B, E>>,
    child_env: Env,
    child_source: CancelSource,
    parent_token: CancelToken,
    parent_listener: Cell<Option<ListenerId>>,
    cap: usize,
    discard: bool,
    index: Cell<usize>,
    in_flight: Cell<usize>,
    results: RefCell<Vec<Option<B>>>,
    failure: RefCell<Option<Failure<E>>>,
    finished: Cell<bool>,
    running: Cell<bool>,
    k: Continuation<Vec<B>, E>,
}

fn concurrent<A, B, E>(
    items: Rc<Vec<A>>,
    f: Rc<dyn Fn(A) -> Effect<B, E>>,
    cap: usize,
    discard: bool,
    env: Env,
    k: Continuation<Vec<B>, E>,
) where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    let child_source = CancelSource::new();
    let child_env = env.with(CURRENT_CANCEL_TOKEN, child_source.token());
    let parent_token = env.cancel_token();
    let results = if discard {
        Vec::new()
    } else {
        (0..items.len()).map(|_| None).collect()
    };
    let state = Rc::new(Concurrent {
        items,
        f,
        child_env,
        child_source: child_source.clone(),
        parent_token: parent_token.clone(),
        parent_listener: Cell::new(None),
        cap,
        discard,
        index: Cell::new(0),
        in_flight: Cell::new(0),
        results: RefCell::new(results),
        failure: RefCell::new(None),
        finished: Cell::new(false),
        running: Cell::new(false),
        k,
    });
    let listener = parent_token.on_abort(move || child_source.abort());
    state.parent_listener.set(listener);
    pump_concurrent(&state);
}

fn record_failure<A, B, E>(state: &Rc<Concurrent<A, B, E>>, failure: Failure<E>)
where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    let mut slot = state.failure.borrow_mut();
    if slot.is_none() {
        *slot = Some(failure);
        drop(slot);
        state.child_source.abort();
    }
}

fn pump_concurrent<A, B, E>(state: &Rc<Concurrent<A, B, E>>)
where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    if state.running.get() {
        return;
    }
    state.running.set(true);
    while !state.finished.get()
        && state.in_flight.get() < state.cap
        && state.index.get() < state.items.len()
        && state.failure.borrow().is_none()
    {
        let i = state.index.get();
        state.index.set(i + 1);
        state.in_flight.set(state.in_flight.get() + 1);
        let item = state.items[i].clone();
        match guarded(|| (state.f)(item)) {
            Err(defect) => {
                state.in_flight.set(state.in_flight.get() - 1);
                record_failure(state, Failure::Unexpected(defect));
            }
            Ok(child) => {
                let st = Rc::clone(state);
                child.run_with(
                    state.child_env.clone(),
                    Box::new(move |outcome| {
                        st.in_flight.set(st.in_flight.get() - 1);
                        match outcome {
                            Ok(value) => {
                                if !st.discard {
                                    st.results.borrow_mut()[i] = Some(value);
                                }
                            }
                            Err(failure) => record_failure(&st, failure),
                        }
                        if !st.running.get() {
                            pump_concurrent(&st);
                        }
                    }),
                );
            }
        }
    }
    state.running.set(false);
    try_finish(state);
}

fn try_finish<A, B, E>(state: &Rc<Concurrent<A, B, E>>)
where
    A: Clone + 'static,
    B: 'static,
    E: 'static,
{
    if state.finished.get() {
        return;
    }
    let failed = state.failure.borrow().is_some();
    if state.in_flight.get() == 0 && (failed || state.index.get() >= state.items.len()) {
        state.finished.set(true);
        if let Some(id) = state.parent_listener.take() {
            state.parent_token.remove_listener(id);
        }
        let resolution = match state.failure.borrow_mut().take() {
            Some(failure) => Err(failure),
            None => {
                let slots = mem::take(&mut *state.results.borrow_mut());
                Ok(slots.into_iter().flatten().collect())
            }
        };
        state.k.resolve(resolution);
    }
}
