//! Polymorphic sequencing.
//!
//! `and_then` accepts four argument shapes: a plain effect, a function
//! returning an effect, a function returning a value, and a plain value.
//! Each shape implements [`AndThenArg`] under a distinct marker type; the
//! marker parameter is the type-tag that keeps the impls apart, and is
//! inferred at the call site.

use crate::effect::Effect;
use std::rc::Rc;

/// Marker types discriminating the accepted `and_then` argument shapes.
pub mod markers {
    /// The argument is a plain effect.
    #[derive(Debug)]
    pub enum EffectArg {}
    /// The argument is a function returning an effect.
    #[derive(Debug)]
    pub enum EffectFnArg {}
    /// The argument is a function returning a plain value.
    #[derive(Debug)]
    pub enum ValueFnArg {}
    /// The argument is a plain value.
    #[derive(Debug)]
    pub enum ValueArg {}
}

/// An argument accepted by [`Effect::and_then`].
pub trait AndThenArg<A, B, E, Marker>: 'static {
    /// Converts the argument into the continuation `and_then` runs.
    fn into_continuation(self) -> Rc<dyn Fn(A) -> Effect<B, E>>;
}

impl<A: 'static, B: 'static, E: 'static> AndThenArg<A, B, E, markers::EffectArg>
    for Effect<B, E>
{
    fn into_continuation(self) -> Rc<dyn Fn(A) -> Effect<B, E>> {
        Rc::new(move |_| self.clone())
    }
}

impl<A: 'static, B: 'static, E: 'static, F> AndThenArg<A, B, E, markers::EffectFnArg> for F
where
    F: Fn(A) -> Effect<B, E> + 'static,
{
    fn into_continuation(self) -> Rc<dyn Fn(A) -> Effect<B, E>> {
        Rc::new(self)
    }
}

impl<A: 'static, B: Clone + 'static, E: 'static, F> AndThenArg<A, B, E, markers::ValueFnArg> for F
where
    F: Fn(A) -> B + 'static,
{
    fn into_continuation(self) -> Rc<dyn Fn(A) -> Effect<B, E>> {
        Rc::new(move |a| Effect::succeed(self(a)))
    }
}

impl<A: 'static, B: Clone + 'static, E: 'static> AndThenArg<A, B, E, markers::ValueArg> for B {
    fn into_continuation(self) -> Rc<dyn Fn(A) -> Effect<B, E>> {
        Rc::new(move |_| Effect::succeed(self.clone()))
    }
}

impl<A: 'static, E: 'static> Effect<A, E> {
    /// Sequences with `next`, which may be an effect, a function returning an
    /// effect, a function returning a value, or a plain value.
    pub fn and_then<B: 'static, Marker, T>(self, next: T) -> Effect<B, E>
    where
        T: AndThenArg<A, B, E, Marker>,
    {
        let continuation = next.into_continuation();
        self.flat_map(move |a| continuation(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::types::Failure;

    #[test]
    fn accepts_a_plain_effect() {
        let runtime = Runtime::new();
        let effect: Effect<i32> = Effect::succeed(1).and_then(Effect::succeed(2));
        assert_eq!(runtime.run_sync(effect), 2);
    }

    #[test]
    fn accepts_a_function_returning_an_effect() {
        let runtime = Runtime::new();
        let effect: Effect<i32> = Effect::succeed(2).and_then(|x: i32| Effect::succeed(x * 5));
        assert_eq!(runtime.run_sync(effect), 10);
    }

    #[test]
    fn accepts_a_function_returning_a_value() {
        let runtime = Runtime::new();
        let effect: Effect<i32> = Effect::succeed(2).and_then(|x: i32| x + 1);
        assert_eq!(runtime.run_sync(effect), 3);
    }

    #[test]
    fn accepts_a_plain_value() {
        let runtime = Runtime::new();
        let effect: Effect<&str> = Effect::succeed(1).and_then("done");
        assert_eq!(runtime.run_sync(effect), "done");
    }

    #[test]
    fn failure_short_circuits_the_continuation() {
        let runtime = Runtime::new();
        let effect: Effect<i32, &str> =
            Effect::<i32, &str>::fail("stop").and_then(|x: i32| x + 1);
        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Expected("stop"))
        );
    }
}
