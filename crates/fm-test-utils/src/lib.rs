//! Testing utilities for the Fork/Merge workspace
//!
//! Branch fixtures, tagged-value shorthands and an event recorder for
//! asserting ordering across concurrent branches.

#![allow(missing_docs)]

use fm_fork::{branch, BranchOutcome, BranchUsage, ExecutionContext, Primer, SharedBranch};
use fm_value::{TaggedValue, TraceId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Tagged values from `(value, confidence)` pairs, origins `branch-0`, `branch-1`, ...
pub fn tagged_all<T, I>(pairs: I) -> Vec<TaggedValue<T>>
where
    I: IntoIterator<Item = (T, f64)>,
{
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, (value, confidence))| {
            TaggedValue::new(value, confidence, format!("branch-{i}"), TraceId::new()).unwrap()
        })
        .collect()
}

/// Branch returning `value` immediately
pub fn constant<T>(value: T, confidence: f64) -> SharedBranch<T>
where
    T: Clone + Send + Sync + 'static,
{
    delayed(value, confidence, Duration::ZERO)
}

/// Branch returning `value` after `delay`
pub fn delayed<T>(value: T, confidence: f64, delay: Duration) -> SharedBranch<T>
where
    T: Clone + Send + Sync + 'static,
{
    branch(move |ctx: ExecutionContext| {
        let value = value.clone();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let origin = format!("branch-{}", ctx.branch_index());
            Ok::<_, anyhow::Error>(TaggedValue::new(value, confidence, origin, TraceId::new())?)
        }
    })
}

/// Branch returning `value` with reported usage
pub fn with_usage<T>(value: T, confidence: f64, usage: BranchUsage) -> SharedBranch<T>
where
    T: Clone + Send + Sync + 'static,
{
    branch(move |_ctx: ExecutionContext| {
        let value = value.clone();
        async move {
            let tagged = TaggedValue::new(value, confidence, "usage", TraceId::new())?;
            Ok::<_, anyhow::Error>(BranchOutcome::new(tagged).with_usage(usage))
        }
    })
}

/// Branch failing with `message` after `delay`
pub fn failing<T>(message: &'static str, delay: Duration) -> SharedBranch<T>
where
    T: Send + 'static,
{
    branch(move |_ctx: ExecutionContext| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Err::<TaggedValue<T>, _>(anyhow::anyhow!(message))
    })
}

/// Branch panicking with `message`
pub fn panicking<T>(message: &'static str) -> SharedBranch<T>
where
    T: Send + 'static,
{
    branch(move |_ctx: ExecutionContext| explode::<T>(message))
}

#[allow(clippy::unused_async)]
async fn explode<T>(message: &'static str) -> anyhow::Result<TaggedValue<T>> {
    panic!("{message}")
}

/// One observed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Primed,
    Started(usize),
    Finished(usize),
    Cancelled(usize),
}

/// Thread-safe log of [`Event`]s in observation order
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Position of `event` in the log
    pub fn position(&self, event: Event) -> Option<usize> {
        self.events.lock().iter().position(|e| *e == event)
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    /// Wrap `inner` so its start, finish and cancellation are recorded
    pub fn instrument<T>(&self, inner: SharedBranch<T>) -> SharedBranch<T>
    where
        T: Send + 'static,
    {
        let recorder = self.clone();
        branch(move |ctx: ExecutionContext| {
            let recorder = recorder.clone();
            let inner = Arc::clone(&inner);
            async move {
                let index = ctx.branch_index();
                recorder.record(Event::Started(index));
                let mut guard = CancelGuard {
                    recorder: &recorder,
                    index,
                    armed: true,
                };
                let outcome = inner.run(ctx).await;
                guard.armed = false;
                recorder.record(Event::Finished(index));
                outcome
            }
        })
    }

    /// Primer recording [`Event::Primed`] after `delay`, reporting `cost`
    pub fn primer(&self, cost: f64, delay: Duration) -> impl Primer + 'static {
        let recorder = self.clone();
        move || {
            let recorder = recorder.clone();
            async move {
                tokio::time::sleep(delay).await;
                recorder.record(Event::Primed);
                Ok::<_, anyhow::Error>(cost)
            }
        }
    }
}

struct CancelGuard<'a> {
    recorder: &'a EventRecorder,
    index: usize,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.recorder.record(Event::Cancelled(self.index));
        }
    }
}
