//! Synchronizing streams between producers and consumers
//!
//! Streams exist exclusively for message passing:
//!
//! - [`Queue`] buffers messages and anycasts each one to a single consumer,
//!   in arrival order (reads are serialized through an internal lock).
//! - [`Channel`] broadcasts every message to all live consumers, each of
//!   which owns a private buffer.
//!
//! Closing is monotonic and idempotent; a closed queue still drains its
//! buffered items before ending consumption with [`StreamClosed`].

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::error::{Abort, SimResult, StreamClosed};
use crate::lock::Lock;
use crate::notify::{wait_on, Notification, Target};
use crate::suspend::postpone;

struct QueueCore<T> {
    buffer: RefCell<VecDeque<T>>,
    waiters: Notification,
    /// Serializes readers so messages are delivered in arrival order.
    read_mutex: Lock,
    closed: Cell<bool>,
}

/// Buffered stream that anycasts messages to individual consumers.
pub struct Queue<T> {
    core: Rc<QueueCore<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static> Queue<T> {
    pub fn new() -> Self {
        Self {
            core: Rc::new(QueueCore {
                buffer: RefCell::new(VecDeque::new()),
                waiters: Notification::new("queue"),
                read_mutex: Lock::new(),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.get()
    }

    /// Put an item into the queue, waking the oldest waiting consumer.
    pub async fn put(&self, item: T) -> SimResult<()> {
        if self.core.closed.get() {
            return Err(Abort::failed(StreamClosed {
                stream: "queue".to_string(),
            }));
        }
        self.core.buffer.borrow_mut().push_back(item);
        self.core.waiters.awake_next();
        postpone().await
    }

    /// Take the next message, waiting for one if necessary.
    ///
    /// Fails with [`StreamClosed`] once the queue is closed and drained.
    pub async fn get(&self) -> SimResult<T> {
        let _reader = self.core.read_mutex.acquire().await?;
        loop {
            if let Some(item) = self.core.buffer.borrow_mut().pop_front() {
                return Ok(item);
            }
            if self.core.closed.get() {
                return Err(Abort::failed(StreamClosed {
                    stream: "queue".to_string(),
                }));
            }
            wait_on(Target::Plain(&self.core.waiters)).await?;
        }
    }

    /// Take the next message, or `None` once the queue is closed and
    /// drained. The iteration form of [`get`](Queue::get).
    pub async fn next(&self) -> SimResult<Option<T>> {
        match self.get().await {
            Ok(item) => Ok(Some(item)),
            Err(abort) if abort.failure_is::<StreamClosed>() => Ok(None),
            Err(abort) => Err(abort),
        }
    }

    /// Prevent putting further messages; buffered items may still be
    /// received. Closing again only postpones.
    pub async fn close(&self) -> SimResult<()> {
        if !self.core.closed.get() {
            self.core.closed.set(true);
            self.core.waiters.awake_all();
        }
        postpone().await
    }
}

impl<T: 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<queue, buffered={}, closed={}>",
            self.core.buffer.borrow().len(),
            self.core.closed.get()
        )
    }
}

struct ChannelCore<T> {
    consumer_buffers: RefCell<HashMap<u64, VecDeque<T>>>,
    next_consumer: Cell<u64>,
    waiters: Notification,
    closed: Cell<bool>,
}

impl<T> ChannelCore<T> {
    fn register(&self) -> u64 {
        let id = self.next_consumer.get();
        self.next_consumer.set(id + 1);
        self.consumer_buffers
            .borrow_mut()
            .insert(id, VecDeque::new());
        id
    }

    fn unregister(&self, id: u64) {
        self.consumer_buffers.borrow_mut().remove(&id);
    }
}

/// Unbuffered stream that broadcasts every message to all consumers.
///
/// Messages put while nobody consumes are lost; consumers only receive
/// what is put while they are subscribed.
pub struct Channel<T> {
    core: Rc<ChannelCore<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> Channel<T> {
    pub fn new() -> Self {
        Self {
            core: Rc::new(ChannelCore {
                consumer_buffers: RefCell::new(HashMap::new()),
                next_consumer: Cell::new(0),
                waiters: Notification::new("channel"),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.get()
    }

    /// Broadcast an item to all subscribed consumers.
    pub async fn put(&self, item: T) -> SimResult<()> {
        if self.core.closed.get() {
            return Err(Abort::failed(StreamClosed {
                stream: "channel".to_string(),
            }));
        }
        for buffer in self.core.consumer_buffers.borrow_mut().values_mut() {
            buffer.push_back(item.clone());
        }
        self.core.waiters.awake_all();
        postpone().await
    }

    /// Receive a single message without a standing subscription.
    ///
    /// Fails with [`StreamClosed`] when the channel is closed before a
    /// message arrives.
    pub async fn get(&self) -> SimResult<T> {
        if self.core.closed.get() {
            return Err(Abort::failed(StreamClosed {
                stream: "channel".to_string(),
            }));
        }
        let id = self.core.register();
        let result = loop {
            if let Some(item) = self
                .core
                .consumer_buffers
                .borrow_mut()
                .get_mut(&id)
                .and_then(VecDeque::pop_front)
            {
                break Ok(item);
            }
            if self.core.closed.get() {
                break Err(Abort::failed(StreamClosed {
                    stream: "channel".to_string(),
                }));
            }
            if let Err(abort) = wait_on(Target::Plain(&self.core.waiters)).await {
                break Err(abort);
            }
        };
        self.core.unregister(id);
        result
    }

    /// Subscribe as a consumer; every message put from now on is delivered
    /// to the returned reader.
    pub fn subscribe(&self) -> ChannelReader<T> {
        let id = self.core.register();
        ChannelReader {
            core: Rc::clone(&self.core),
            id,
        }
    }

    /// Close the channel, waking all consumers. Closing again only
    /// postpones.
    pub async fn close(&self) -> SimResult<()> {
        if !self.core.closed.get() {
            self.core.closed.set(true);
            self.core.waiters.awake_all();
        }
        postpone().await
    }
}

impl<T: Clone + 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<channel, consumers={}, closed={}>",
            self.core.consumer_buffers.borrow().len(),
            self.core.closed.get()
        )
    }
}

/// A consumer subscription of a [`Channel`]; unsubscribes on drop.
pub struct ChannelReader<T> {
    core: Rc<ChannelCore<T>>,
    id: u64,
}

impl<T: Clone + 'static> ChannelReader<T> {
    /// The next broadcast message, or `None` once the channel is closed and
    /// this reader's buffer is drained.
    pub async fn next(&mut self) -> SimResult<Option<T>> {
        loop {
            if let Some(item) = self
                .core
                .consumer_buffers
                .borrow_mut()
                .get_mut(&self.id)
                .and_then(VecDeque::pop_front)
            {
                return Ok(Some(item));
            }
            if self.core.closed.get() {
                return Ok(None);
            }
            wait_on(Target::Plain(&self.core.waiters)).await?;
        }
    }
}

impl<T> Drop for ChannelReader<T> {
    fn drop(&mut self) {
        self.core.unregister(self.id);
    }
}
