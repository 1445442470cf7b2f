//! Blocking producer/consumer queue over a pluggable item store

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use spillstore::{Error, Result};
use tracing::debug;

/// How often `join` wakes up to report what it is waiting for
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Where queued items live. Only called with the queue lock held.
pub trait QueueStorage: Send {
    /// Queued item type
    type Item;

    /// Store an item at the tail
    fn push(&mut self, item: Self::Item) -> Result<()>;

    /// Remove the head item; only called when `len() > 0`
    fn pop(&mut self) -> Result<Self::Item>;

    /// Items stored
    fn len(&self) -> usize;

    /// True if nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct State<S> {
    storage: S,
    unfinished_tasks: usize,
}

/// Unbounded blocking queue with task accounting.
///
/// `put` never blocks. `get` blocks until an item is available. Every item
/// put counts as an unfinished task until a consumer calls `task_done`;
/// `join` waits for that count to reach zero. A fetch that fails settles
/// its own task, so callers only call `task_done` for items they received.
pub struct BlockingQueue<S> {
    name: String,
    state: Mutex<State<S>>,
    not_empty: Condvar,
    all_tasks_done: Condvar,
}

impl<S: QueueStorage> BlockingQueue<S> {
    /// Wrap `storage`
    pub fn new(name: impl Into<String>, storage: S) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                storage,
                unfinished_tasks: 0,
            }),
            not_empty: Condvar::new(),
            all_tasks_done: Condvar::new(),
        }
    }

    /// Queue name, used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item and wake one waiting consumer
    pub fn put(&self, item: S::Item) -> Result<()> {
        let mut state = self.state.lock();
        state.storage.push(item)?;
        state.unfinished_tasks += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head item, waiting as long as needed
    pub fn get(&self) -> Result<S::Item> {
        let mut state = self.state.lock();
        while state.storage.is_empty() {
            self.not_empty.wait(&mut state);
        }
        self.take_head(&mut state)
    }

    /// Remove the head item, waiting at most `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<S::Item>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.storage.is_empty() {
            if self
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.storage.is_empty()
            {
                return Ok(None);
            }
        }
        self.take_head(&mut state).map(Some)
    }

    /// Remove the head item if there is one
    pub fn try_get(&self) -> Result<Option<S::Item>> {
        let mut state = self.state.lock();
        if state.storage.is_empty() {
            return Ok(None);
        }
        self.take_head(&mut state).map(Some)
    }

    fn take_head(&self, state: &mut State<S>) -> Result<S::Item> {
        let result = state.storage.pop();
        if let Err(err) = &result {
            // The item is gone either way; nobody will call task_done for it
            state.unfinished_tasks = state.unfinished_tasks.saturating_sub(1);
            if state.unfinished_tasks == 0 {
                self.all_tasks_done.notify_all();
            }
            debug!(queue = %self.name, error = %err, "dropped unreadable queue item");
        }
        result
    }

    /// Mark one previously fetched item as processed
    pub fn task_done(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.unfinished_tasks == 0 {
            return Err(Error::TaskDoneOverflow);
        }
        state.unfinished_tasks -= 1;
        if state.unfinished_tasks == 0 {
            self.all_tasks_done.notify_all();
        }
        Ok(())
    }

    /// Block until every item put has been marked with `task_done`
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished_tasks > 0 {
            let result = self.all_tasks_done.wait_for(&mut state, JOIN_POLL_INTERVAL);
            if result.timed_out() && state.unfinished_tasks > 0 {
                debug!(
                    queue = %self.name,
                    qsize = state.storage.len(),
                    unfinished_tasks = state.unfinished_tasks,
                    "still waiting for queue tasks to finish"
                );
            }
        }
    }

    /// Items waiting to be fetched
    pub fn qsize(&self) -> usize {
        self.state.lock().storage.len()
    }

    /// Items put but not yet marked done
    pub fn unfinished_tasks(&self) -> usize {
        self.state.lock().unfinished_tasks
    }

    /// Run `f` against the storage with the queue locked
    pub fn with_storage<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock().storage)
    }

    /// Take the storage back out of the queue
    pub fn into_storage(self) -> S {
        self.state.into_inner().storage
    }
}
