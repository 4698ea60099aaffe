//! Middleware pipeline for reporter fetch and dispatch
//!
//! A middleware takes the current function and returns a replacement with the
//! same signature. A [`Pipeline`] holds an ordered list of them and composes
//! the list once, when a reporter is built, into a single callable.
//!
//! Composition order: a pipeline `[A, B]` applied to `base` yields
//! `A(B(base))`, so `A` runs first on entry and last on exit.

use super::reporter::{DispatchFn, DispatchFuture, FetchFn, FetchFuture, Reporter};
use std::fmt;
use std::sync::Arc;

/// One transform stage over a function of type `F`
pub struct Middleware<F>(Arc<dyn Fn(F) -> F + Send + Sync>);

impl<F> Middleware<F> {
    pub fn new<W>(wrap: W) -> Self
    where
        W: Fn(F) -> F + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    /// Wraps `inner`, returning the replacement function
    pub fn wrap(&self, inner: F) -> F {
        (self.0)(inner)
    }
}

impl<F> Clone for Middleware<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F> fmt::Debug for Middleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware(..)")
    }
}

/// Middleware over a reporter's fetch step
pub type FetchMiddleware = Middleware<FetchFn>;

/// Middleware over a reporter's dispatch step
pub type DispatchMiddleware = Middleware<DispatchFn>;

/// Ordered list of middleware stages
pub struct Pipeline<F> {
    stages: Vec<Middleware<F>>,
}

impl<F> Pipeline<F> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push(&mut self, stage: Middleware<F>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wraps `base` with every stage; the first stage ends up outermost
    pub fn compose(&self, base: F) -> F {
        self.stages
            .iter()
            .rev()
            .fold(base, |inner, stage| stage.wrap(inner))
    }
}

impl<F> Default for Pipeline<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for Pipeline<F> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<F> fmt::Debug for Pipeline<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl<F> FromIterator<Middleware<F>> for Pipeline<F> {
    fn from_iter<I: IntoIterator<Item = Middleware<F>>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

impl<F> Extend<Middleware<F>> for Pipeline<F> {
    fn extend<I: IntoIterator<Item = Middleware<F>>>(&mut self, iter: I) {
        self.stages.extend(iter);
    }
}

/// Builds a fetch middleware from a function of the node and the next stage
///
/// # Example
///
/// ```no_run
/// use newscover::crawler::fetch_middleware;
///
/// let logged = fetch_middleware(|node, next| {
///     Box::pin(async move {
///         tracing::debug!(url = %node.url(), "fetching");
///         next(node).await
///     })
/// });
/// ```
pub fn fetch_middleware<M>(stage: M) -> FetchMiddleware
where
    M: Fn(Arc<Reporter>, FetchFn) -> FetchFuture + Send + Sync + 'static,
{
    let stage = Arc::new(stage);
    Middleware::new(move |next: FetchFn| {
        let stage = Arc::clone(&stage);
        Arc::new(move |node: Arc<Reporter>| stage(node, Arc::clone(&next))) as FetchFn
    })
}

/// Builds a dispatch middleware from a function of the node, the bulk flag
/// and the next stage
pub fn dispatch_middleware<M>(stage: M) -> DispatchMiddleware
where
    M: Fn(Arc<Reporter>, bool, DispatchFn) -> DispatchFuture + Send + Sync + 'static,
{
    let stage = Arc::new(stage);
    Middleware::new(move |next: DispatchFn| {
        let stage = Arc::clone(&stage);
        Arc::new(move |node: Arc<Reporter>, bulk: bool| stage(node, bulk, Arc::clone(&next)))
            as DispatchFn
    })
}
