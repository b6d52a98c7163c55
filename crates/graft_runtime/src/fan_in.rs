//! Lazy fan-in of asynchronous sources.
//!
//! [`FanIn`] merges a growable set of [`Source`]s into one sequence. Sources
//! are only pulled while a consumer is waiting, so no source ever runs more
//! than one value ahead of demand. Values are handed out in the order they
//! become ready.
//!
//! Each pull runs on its own tokio task which owns the source for the duration
//! of that pull and hands it back afterwards. All registry state lives behind
//! one lock that is never held across an await.

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{BoxStream, Stream, StreamExt};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outcome of advancing a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The next value.
    Item(T),
    /// The source is exhausted.
    Done,
}

/// A producer that can be pulled one value at a time and released early.
#[async_trait]
pub trait Source: Send {
    type Item;

    /// Produces the next value.
    async fn advance(&mut self) -> SourceResult<Step<Self::Item>>;

    /// Releases the source after a graceful cancellation.
    async fn close(&mut self) {}

    /// Releases the source after the registry was aborted with `error`.
    async fn abort(&mut self, _error: &SourceError) {
        self.close().await;
    }
}

/// A boxed source.
pub type BoxSource<T> = Box<dyn Source<Item = T>>;

/// A [`Source`] backed by a stream.
pub struct StreamSource<T> {
    stream: Option<BoxStream<'static, SourceResult<T>>>,
}

impl<T: Send + 'static> StreamSource<T> {
    /// Wraps an infallible stream.
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self::fallible(stream.map(Ok))
    }

    /// Wraps a stream whose items may fail.
    pub fn fallible(stream: impl Stream<Item = SourceResult<T>> + Send + 'static) -> Self {
        Self {
            stream: Some(stream.boxed()),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Source for StreamSource<T> {
    type Item = T;

    async fn advance(&mut self) -> SourceResult<Step<T>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Step::Done);
        };
        match stream.next().await {
            Some(item) => item.map(Step::Item),
            None => Ok(Step::Done),
        }
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}

type Waiter<T> = oneshot::Sender<SourceResult<Option<T>>>;

enum AfterPull<T> {
    Continue,
    Release(BoxSource<T>, Option<SourceError>),
    Abort(SourceError),
}

struct State<T> {
    /// Live sources by id; `None` while the source is being pulled.
    sources: IndexMap<u64, Option<BoxSource<T>>>,
    in_flight: IndexMap<u64, JoinHandle<()>>,
    buffer: VecDeque<T>,
    waiters: VecDeque<Waiter<T>>,
    next_id: u64,
    done: bool,
    error: Option<SourceError>,
}

impl<T> State<T> {
    fn deliver(&mut self, mut item: T) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(Some(item))) {
                Err(Ok(Some(returned))) => item = returned,
                _ => return,
            }
        }
        self.buffer.push_back(item);
    }

    fn finish(&mut self) {
        self.done = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(None));
        }
    }
}

/// Everything left to release once the registry is closed.
struct Teardown<T> {
    idle: Vec<BoxSource<T>>,
    handles: Vec<JoinHandle<()>>,
    waiters: VecDeque<Waiter<T>>,
    error: Option<SourceError>,
}

impl<T> Teardown<T> {
    fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.handles.is_empty() && self.waiters.is_empty()
    }

    async fn run(self) {
        let Self {
            idle,
            handles,
            waiters,
            error,
        } = self;
        let releases = idle.into_iter().map(|mut source| {
            let error = error.clone();
            async move { release(&mut source, error.as_ref()).await }
        });
        futures::join!(join_all(releases), join_all(handles));

        for waiter in waiters {
            let terminal = match &error {
                Some(error) => Err(error.clone()),
                None => Ok(None),
            };
            let _ = waiter.send(terminal);
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cancel: CancellationToken,
}

/// Merges many sources into one lazily pulled sequence.
pub struct FanIn<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FanIn<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for FanIn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> FanIn<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    sources: IndexMap::new(),
                    in_flight: IndexMap::new(),
                    buffer: VecDeque::new(),
                    waiters: VecDeque::new(),
                    next_id: 0,
                    done: false,
                    error: None,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a source.
    ///
    /// If consumers are already waiting the source is pulled right away. A
    /// source added to a finished registry is released and `false` is
    /// returned. Must be called from within a tokio runtime.
    pub fn add(&self, source: impl Source<Item = T> + 'static) -> bool {
        self.add_boxed(Box::new(source))
    }

    /// Registers an already boxed source. See [`FanIn::add`].
    pub fn add_boxed(&self, source: BoxSource<T>) -> bool {
        let mut state = self.lock();
        if state.done {
            let error = state.error.clone();
            drop(state);
            tokio::spawn(async move {
                let mut source = source;
                release(&mut source, error.as_ref()).await;
            });
            return false;
        }

        let id = state.next_id;
        state.next_id += 1;
        if state.waiters.is_empty() {
            state.sources.insert(id, Some(source));
        } else {
            state.sources.insert(id, None);
            let handle = self.spawn_pull(id, source);
            state.in_flight.insert(id, handle);
        }
        trace!(source = id, "source added");
        true
    }

    /// Waits for the next value.
    ///
    /// Returns `Ok(None)` once every source is exhausted or the registry was
    /// cancelled, and the abort error if it was aborted.
    ///
    /// # Errors
    ///
    /// Returns the error the registry was aborted with.
    pub async fn next(&self) -> SourceResult<Option<T>> {
        let receiver = {
            let mut state = self.lock();
            if let Some(item) = state.buffer.pop_front() {
                return Ok(Some(item));
            }
            if state.done {
                return state.error.clone().map_or(Ok(None), Err);
            }
            if state.sources.is_empty() {
                state.done = true;
                return Ok(None);
            }

            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            self.pull_idle(&mut state);
            receiver
        };
        receiver.await.unwrap_or(Ok(None))
    }

    /// Takes an already buffered value without pulling any source.
    pub fn try_next_buffered(&self) -> Option<T> {
        self.lock().buffer.pop_front()
    }

    /// Number of sources that have not finished yet.
    pub fn live_sources(&self) -> usize {
        self.lock().sources.len()
    }

    /// Returns true once the registry will not produce further values.
    pub fn is_done(&self) -> bool {
        let state = self.lock();
        state.done && state.buffer.is_empty()
    }

    /// Cancels the registry, releasing every live source.
    ///
    /// Completes only after every source has been released. Waiting
    /// consumers observe the end of the sequence.
    pub async fn cancel(&self) {
        self.shutdown(None).await;
    }

    /// Aborts the registry with `error`.
    ///
    /// Every live source is released through [`Source::abort`]; waiting
    /// consumers then receive `error`.
    ///
    /// # Errors
    ///
    /// Always returns `error` once cleanup has finished.
    pub async fn abort(&self, error: SourceError) -> SourceResult<()> {
        self.shutdown(Some(error.clone())).await;
        Err(error)
    }

    /// Returns a guard that cancels the registry when dropped.
    ///
    /// The registry is closed as soon as the guard drops, so later
    /// [`FanIn::add`] calls are rejected. Releasing the sources runs on a
    /// spawned task.
    #[must_use]
    pub fn drop_guard(&self) -> CancelOnDrop<T> {
        CancelOnDrop {
            fan_in: self.clone(),
        }
    }

    /// Adapts the registry into a stream that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = SourceResult<T>> {
        futures::stream::unfold(Some(self), |fan_in| async move {
            let fan_in = fan_in?;
            match fan_in.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(fan_in))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }

    fn pull_idle(&self, state: &mut State<T>) {
        let State {
            sources, in_flight, ..
        } = state;
        for (&id, slot) in sources.iter_mut() {
            if let Some(source) = slot.take() {
                in_flight.insert(id, self.spawn_pull(id, source));
            }
        }
    }

    fn spawn_pull(&self, id: u64, mut source: BoxSource<T>) -> JoinHandle<()> {
        let fan_in = self.clone();
        let token = self.inner.cancel.clone();
        trace!(source = id, "pulling source");
        tokio::spawn(async move {
            let step = tokio::select! {
                biased;
                () = token.cancelled() => None,
                step = source.advance() => Some(step),
            };
            match step {
                Some(step) => fan_in.on_pulled(id, source, step).await,
                None => {
                    let error = fan_in.lock().error.clone();
                    release(&mut source, error.as_ref()).await;
                }
            }
        })
    }

    async fn on_pulled(&self, id: u64, source: BoxSource<T>, step: SourceResult<Step<T>>) {
        let after = {
            let mut state = self.lock();
            state.in_flight.shift_remove(&id);
            if state.done {
                AfterPull::Release(source, state.error.clone())
            } else {
                match step {
                    Ok(Step::Item(item)) => {
                        state.deliver(item);
                        if state.waiters.is_empty() {
                            state.sources.insert(id, Some(source));
                        } else {
                            let handle = self.spawn_pull(id, source);
                            state.in_flight.insert(id, handle);
                        }
                        AfterPull::Continue
                    }
                    Ok(Step::Done) => {
                        trace!(source = id, "source exhausted");
                        state.sources.shift_remove(&id);
                        if state.sources.is_empty() {
                            debug!("all sources exhausted");
                            state.finish();
                        }
                        AfterPull::Continue
                    }
                    Err(error) => {
                        state.sources.insert(id, Some(source));
                        AfterPull::Abort(error)
                    }
                }
            }
        };

        match after {
            AfterPull::Continue => {}
            AfterPull::Release(mut source, error) => release(&mut source, error.as_ref()).await,
            AfterPull::Abort(error) => {
                debug!(source = id, %error, "source failed, aborting fan-in");
                let _ = self.abort(error).await;
            }
        }
    }

    async fn shutdown(&self, error: Option<SourceError>) {
        self.close(error).run().await;
    }

    /// Marks the registry done and collects what still has to be released.
    fn close(&self, error: Option<SourceError>) -> Teardown<T> {
        let teardown = {
            let mut state = self.lock();
            state.done = true;
            if state.error.is_none() {
                state.error.clone_from(&error);
            }
            state.buffer.clear();
            Teardown {
                idle: state
                    .sources
                    .drain(..)
                    .filter_map(|(_, source)| source)
                    .collect(),
                handles: state.in_flight.drain(..).map(|(_, handle)| handle).collect(),
                waiters: std::mem::take(&mut state.waiters),
                error,
            }
        };

        debug!(
            idle = teardown.idle.len(),
            in_flight = teardown.handles.len(),
            aborted = teardown.error.is_some(),
            "shutting down fan-in"
        );
        self.inner.cancel.cancel();
        teardown
    }
}

/// Cancels a [`FanIn`] when dropped. See [`FanIn::drop_guard`].
#[must_use = "the registry is cancelled as soon as the guard is dropped"]
pub struct CancelOnDrop<T: Send + 'static> {
    fan_in: FanIn<T>,
}

impl<T: Send + 'static> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        let finished = self.fan_in.lock().done;
        if finished {
            return;
        }
        let teardown = self.fan_in.close(None);
        if teardown.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(teardown.run());
            }
            Err(_) => debug!("no runtime to release fan-in sources on"),
        }
    }
}

async fn release<T>(source: &mut BoxSource<T>, error: Option<&SourceError>) {
    match error {
        Some(error) => source.abort(error).await,
        None => source.close().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn delayed(items: Vec<i32>, delay_ms: u64) -> StreamSource<i32> {
        StreamSource::new(futures::stream::iter(items).then(move |item| async move {
            sleep(Duration::from_millis(delay_ms)).await;
            item
        }))
    }

    struct Counting {
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Source for Counting {
        type Item = usize;

        async fn advance(&mut self) -> SourceResult<Step<usize>> {
            Ok(Step::Item(self.pulls.fetch_add(1, Ordering::SeqCst)))
        }
    }

    struct Stalled {
        released: Arc<AtomicBool>,
        aborted_with: Arc<Mutex<Option<SourceError>>>,
    }

    #[async_trait]
    impl Source for Stalled {
        type Item = i32;

        async fn advance(&mut self) -> SourceResult<Step<i32>> {
            std::future::pending().await
        }

        async fn close(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }

        async fn abort(&mut self, error: &SourceError) {
            *self.aborted_with.lock().unwrap() = Some(error.clone());
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct Tracked {
        inner: StreamSource<i32>,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Source for Tracked {
        type Item = i32;

        async fn advance(&mut self) -> SourceResult<Step<i32>> {
            self.inner.advance().await
        }

        async fn close(&mut self) {
            self.inner.close().await;
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn stalled() -> (Stalled, Arc<AtomicBool>, Arc<Mutex<Option<SourceError>>>) {
        let released = Arc::new(AtomicBool::new(false));
        let aborted_with = Arc::new(Mutex::new(None));
        (
            Stalled {
                released: Arc::clone(&released),
                aborted_with: Arc::clone(&aborted_with),
            },
            released,
            aborted_with,
        )
    }

    async fn drain(fan_in: &FanIn<i32>) -> Vec<i32> {
        let mut items = Vec::new();
        while let Some(item) = fan_in.next().await.unwrap() {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_empty_registry_is_done() {
        let fan_in = FanIn::<i32>::new();
        assert_eq!(fan_in.next().await, Ok(None));
        assert!(fan_in.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_in_ready_order() {
        let fan_in = FanIn::new();
        fan_in.add(delayed(vec![1, 3, 5], 10));
        fan_in.add(delayed(vec![2, 4, 6], 12));

        assert_eq!(drain(&fan_in).await, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(fan_in.next().await, Ok(None));
        assert_eq!(fan_in.live_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulls_only_on_demand() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let fan_in = FanIn::new();
        fan_in.add(Counting {
            pulls: Arc::clone(&pulls),
        });

        assert_eq!(pulls.load(Ordering::SeqCst), 0);
        for expected in 1..=3 {
            fan_in.next().await.unwrap();
            sleep(Duration::from_millis(50)).await;
            assert_eq!(pulls.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_values_precede_done() {
        let fan_in = FanIn::new();
        fan_in.add(StreamSource::new(futures::stream::iter(vec![1])));
        fan_in.add(StreamSource::new(futures::stream::iter(vec![2])));

        let mut items = drain(&fan_in).await;
        items.sort_unstable();
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_while_waiting() {
        let fan_in = FanIn::new();
        fan_in.add(delayed(vec![1], 100));

        let consumer = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(fan_in.add(delayed(vec![2], 5)));

        assert_eq!(consumer.await.unwrap(), Ok(Some(2)));
        assert_eq!(fan_in.next().await, Ok(Some(1)));
        assert_eq!(fan_in.next().await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_guard_releases_in_flight_sources() {
        let fan_in = FanIn::new();
        let (source, released, _) = stalled();
        fan_in.add(source);

        let consumer = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };
        sleep(Duration::from_millis(10)).await;
        drop(fan_in.drop_guard());
        sleep(Duration::from_millis(10)).await;

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(consumer.await.unwrap(), Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_guard_releases_idle_sources_and_rejects_adds() {
        let released = Arc::new(AtomicBool::new(false));
        let fan_in = FanIn::new();
        fan_in.add(Tracked {
            inner: StreamSource::new(
                futures::stream::iter(vec![1]).chain(futures::stream::pending()),
            ),
            released: Arc::clone(&released),
        });
        let guard = fan_in.drop_guard();

        assert_eq!(fan_in.next().await, Ok(Some(1)));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(fan_in.live_sources(), 1);

        drop(guard);
        assert!(fan_in.is_done());
        sleep(Duration::from_millis(10)).await;
        assert!(released.load(Ordering::SeqCst));

        let (late, late_released, _) = stalled();
        assert!(!fan_in.add(late));
        sleep(Duration::from_millis(10)).await;
        assert!(late_released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_resolve_in_ready_order() {
        let fan_in = FanIn::new();
        fan_in.add(delayed(vec![1], 30));
        fan_in.add(delayed(vec![2], 10));

        let first = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };
        sleep(Duration::from_millis(1)).await;
        let second = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };

        assert_eq!(first.await.unwrap(), Ok(Some(2)));
        assert_eq!(second.await.unwrap(), Ok(Some(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_in_flight_sources() {
        let (a, a_released, _) = stalled();
        let (b, b_released, _) = stalled();
        let fan_in = FanIn::new();
        fan_in.add(a);
        fan_in.add(b);

        let consumer = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };
        sleep(Duration::from_millis(10)).await;

        fan_in.cancel().await;
        assert!(a_released.load(Ordering::SeqCst));
        assert!(b_released.load(Ordering::SeqCst));
        assert_eq!(consumer.await.unwrap(), Ok(None));
        assert!(!fan_in.add(delayed(vec![1], 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_rejects_waiters_after_cleanup() {
        let (a, a_released, a_error) = stalled();
        let fan_in = FanIn::new();
        fan_in.add(a);

        let consumer = {
            let fan_in = fan_in.clone();
            tokio::spawn(async move { fan_in.next().await })
        };
        sleep(Duration::from_millis(10)).await;

        let error = SourceError::aborted("transport lost");
        assert_eq!(fan_in.abort(error.clone()).await, Err(error.clone()));
        assert!(a_released.load(Ordering::SeqCst));
        assert_eq!(a_error.lock().unwrap().clone(), Some(error.clone()));
        assert_eq!(consumer.await.unwrap(), Err(error.clone()));
        assert_eq!(fan_in.next().await, Err(error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_aborts() {
        let (b, b_released, _) = stalled();
        let fan_in = FanIn::new();
        fan_in.add(StreamSource::<i32>::fallible(futures::stream::iter(vec![Err(
            SourceError::failed("boom"),
        )])));
        fan_in.add(b);

        assert_eq!(fan_in.next().await, Err(SourceError::failed("boom")));
        assert!(b_released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_into_stream() {
        let fan_in = FanIn::new();
        fan_in.add(delayed(vec![1, 2], 1));
        let items: Vec<_> = fan_in.into_stream().collect().await;
        assert_eq!(items, vec![Ok(1), Ok(2)]);
    }
}
