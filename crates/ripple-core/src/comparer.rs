//! # Comparers
//!
//! Per-stage equality used to decide whether a freshly computed value can
//! reuse the previous generation's value (and be reported `Cached`).
//!
//! A comparer that panics is contained: the comparison is reported as a
//! fault and the entry is treated as `Modified`.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Equality function for the output type of one stage.
pub trait Comparer<T>: Send + Sync {
    /// Returns `true` when `current` is indistinguishable from `previous`.
    fn equals(&self, previous: &T, current: &T) -> bool;
}

/// Comparer backed by `PartialEq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparer;

impl<T: PartialEq> Comparer<T> for DefaultComparer {
    fn equals(&self, previous: &T, current: &T) -> bool {
        previous == current
    }
}

/// Comparer backed by a closure.
pub struct FnComparer<T, F> {
    f: F,
    _marker: PhantomData<fn(&T, &T)>,
}

impl<T, F> FnComparer<T, F>
where
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    /// Wrap a closure as a comparer.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Comparer<T> for FnComparer<T, F>
where
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    fn equals(&self, previous: &T, current: &T) -> bool {
        (self.f)(previous, current)
    }
}

/// Build a shared comparer from a closure.
pub fn comparer_fn<T, F>(f: F) -> Arc<dyn Comparer<T>>
where
    T: 'static,
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    Arc::new(FnComparer::new(f))
}

/// Outcome of a guarded comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Comparison {
    Equal,
    NotEqual,
    Faulted(String),
}

/// Run a comparer, containing any panic it raises.
pub(crate) fn compare_guarded<T>(comparer: &dyn Comparer<T>, previous: &T, current: &T) -> Comparison {
    match catch_unwind(AssertUnwindSafe(|| comparer.equals(previous, current))) {
        Ok(true) => Comparison::Equal,
        Ok(false) => Comparison::NotEqual,
        Err(payload) => Comparison::Faulted(panic_message(payload.as_ref())),
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn default_comparer_uses_partial_eq() {
        let comparer = DefaultComparer;
        assert!(Comparer::<String>::equals(&comparer, &"a".into(), &"a".into()));
        assert!(!Comparer::<String>::equals(&comparer, &"a".into(), &"b".into()));
    }

    #[test]
    fn fn_comparer_can_ignore_fields() {
        let comparer = comparer_fn(|a: &(u32, u32), b: &(u32, u32)| a.0 == b.0);
        assert!(comparer.equals(&(1, 2), &(1, 3)));
        assert!(!comparer.equals(&(1, 2), &(2, 2)));
    }

    #[test]
    fn panicking_comparer_is_contained() {
        let comparer = comparer_fn(|_: &u32, _: &u32| -> bool { panic!("bad comparer") });
        let outcome = compare_guarded(comparer.as_ref(), &1, &1);
        assert_eq!(outcome, Comparison::Faulted("bad comparer".to_string()));
    }

    #[test]
    fn guarded_comparison_reports_equality() {
        let comparer = DefaultComparer;
        assert_eq!(compare_guarded::<u32>(&comparer, &4, &4), Comparison::Equal);
        assert_eq!(compare_guarded::<u32>(&comparer, &4, &5), Comparison::NotEqual);
    }
}
