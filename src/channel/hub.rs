//! Message hub and dispatch task.
//!
//! Decouples graph mutation (terminal/UI thread) from the construction
//! thread: `send` dispatches synchronously on the caller's thread, `post`
//! enqueues onto a bounded FIFO drained by a dedicated background task.
//! Uses an rtrb ring buffer as the queue transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use thiserror::Error;
use tracing::warn;

use super::event::{EventSink, PipeEvent};

/// Default bounded queue capacity for posted events.
pub const DEFAULT_POST_CAPACITY: usize = 60;

/// Default time `post` may block waiting for a free queue slot.
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long the dispatch task idles before running housekeeping.
pub const DISPATCH_IDLE_TICK: Duration = Duration::from_millis(500);

/// Channel failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The post queue stayed full for the whole post timeout.
    #[error("event queue full")]
    QueueFull,
}

/// Callback invoked exactly once with the posted payload: after delivery,
/// or immediately when the queue rejects the post. Gives the poster a place
/// to reclaim payload ownership so nothing leaks on a full queue.
pub type DoneCallback = Box<dyn FnOnce(PipeEvent) + Send>;

/// Synchronous event dispatcher installed at hub creation.
pub type Dispatcher = Arc<dyn Fn(&PipeEvent) + Send + Sync>;

struct Posted {
    event: PipeEvent,
    done: Option<DoneCallback>,
}

/// Single-consumer event channel: synchronous `send` plus a bounded,
/// FIFO `post` queue.
pub struct MessageHub {
    dispatcher: Dispatcher,
    reentrant: Mutex<()>,
    producer: Mutex<Producer<Posted>>,
    post_timeout: Duration,
}

impl MessageHub {
    /// Creates a hub with default capacity and post timeout. Returns the
    /// hub and the queue's consumer side for a [`DispatchTask`].
    pub fn new(dispatcher: Dispatcher) -> (Arc<MessageHub>, EventQueue) {
        Self::with_capacity(dispatcher, DEFAULT_POST_CAPACITY, DEFAULT_POST_TIMEOUT)
    }

    /// Creates a hub with an explicit queue capacity and post timeout.
    pub fn with_capacity(
        dispatcher: Dispatcher,
        capacity: usize,
        post_timeout: Duration,
    ) -> (Arc<MessageHub>, EventQueue) {
        let (producer, consumer) = RingBuffer::new(capacity);
        let hub = Arc::new(MessageHub {
            dispatcher,
            reentrant: Mutex::new(()),
            producer: Mutex::new(producer),
            post_timeout,
        });
        (hub, EventQueue { consumer })
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Dispatches an event synchronously on the caller's thread.
    ///
    /// Events in the reentrant class are serialized behind one lock so two
    /// threads cannot run their handlers concurrently.
    pub fn send(&self, event: &PipeEvent) {
        if event.is_reentrant() {
            let _guard = Self::lock(&self.reentrant);
            (self.dispatcher)(event);
        } else {
            (self.dispatcher)(event);
        }
    }

    /// Enqueues an event for the dispatch task, FIFO.
    ///
    /// Blocks up to the post timeout when the queue is full, then fails
    /// with [`ChannelError::QueueFull`].
    pub fn post(&self, event: PipeEvent) -> Result<(), ChannelError> {
        self.post_inner(event, None)
    }

    /// Like [`post`](Self::post), with a callback that receives the payload
    /// exactly once: after delivery, or on rejection.
    pub fn post_with(&self, event: PipeEvent, done: DoneCallback) -> Result<(), ChannelError> {
        self.post_inner(event, Some(done))
    }

    fn post_inner(&self, event: PipeEvent, done: Option<DoneCallback>) -> Result<(), ChannelError> {
        let deadline = Instant::now() + self.post_timeout;
        let mut item = Posted { event, done };
        loop {
            let push = Self::lock(&self.producer).push(item);
            match push {
                Ok(()) => return Ok(()),
                Err(PushError::Full(returned)) => {
                    item = returned;
                    if Instant::now() >= deadline {
                        warn!(event = item.event.name(), "event queue full, post rejected");
                        if let Some(done) = item.done.take() {
                            done(item.event);
                        }
                        return Err(ChannelError::QueueFull);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

impl EventSink for MessageHub {
    /// Best-effort, non-blocking post used by the graph database. A full
    /// queue drops the notification with a warning instead of stalling the
    /// mutating thread.
    fn notify(&self, event: PipeEvent) {
        match Self::lock(&self.producer).push(Posted { event, done: None }) {
            Ok(()) => {}
            Err(PushError::Full(item)) => {
                warn!(event = item.event.name(), "event queue full, notification dropped");
            }
        }
    }
}

/// Consumer side of the post queue.
pub struct EventQueue {
    consumer: Consumer<Posted>,
}

impl EventQueue {
    /// Number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }

    /// Pops the next event, counting as delivery: the event's done callback
    /// (if any) runs before the event is returned. Used by tests and by
    /// hosts that drain the queue themselves instead of spawning a
    /// [`DispatchTask`].
    pub fn pop(&mut self) -> Option<PipeEvent> {
        let mut item = self.pop_posted()?;
        let event = item.event.clone();
        if let Some(done) = item.done.take() {
            done(item.event);
        }
        Some(event)
    }

    fn pop_posted(&mut self) -> Option<Posted> {
        self.consumer.pop().ok()
    }
}

/// Housekeeping hook run by the dispatch task after an idle period.
pub type Housekeeping = Box<dyn FnMut() + Send>;

/// Dedicated background task draining the post queue.
///
/// Delivery order is FIFO. The task wakes on a short tick; when a full idle
/// interval passes without traffic it runs the optional housekeeping hook.
/// Dropping the task requests shutdown and joins the thread.
pub struct DispatchTask {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchTask {
    /// Spawns the dispatch thread.
    pub fn spawn(hub: Arc<MessageHub>, queue: EventQueue) -> Self {
        Self::spawn_with_housekeeping(hub, queue, None)
    }

    /// Spawns the dispatch thread with an idle housekeeping hook.
    pub fn spawn_with_housekeeping(
        hub: Arc<MessageHub>,
        mut queue: EventQueue,
        mut housekeeping: Option<Housekeeping>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            let mut idle_since = Instant::now();
            while !shutdown_flag.load(Ordering::Acquire) {
                match queue.pop_posted() {
                    Some(mut item) => {
                        hub.send(&item.event);
                        if let Some(done) = item.done.take() {
                            done(item.event);
                        }
                        idle_since = Instant::now();
                    }
                    None => {
                        if idle_since.elapsed() >= DISPATCH_IDLE_TICK {
                            if let Some(hook) = housekeeping.as_mut() {
                                hook();
                            }
                            idle_since = Instant::now();
                        }
                        thread::sleep(Duration::from_millis(2));
                    }
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Requests shutdown and joins the dispatch thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchTask {
    fn drop(&mut self) {
        self.stop();
    }
}
