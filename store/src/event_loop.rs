//! Single-threaded completion loop
//!
//! Host databases never invoke completion callbacks from inside the call
//! that started the operation. They post them here, and the owner of the
//! loop runs them by draining it.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// A queued completion
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for posting completions
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl LoopHandle {
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(task)).is_err() {
            debug!("Event loop closed, completion dropped");
        }
    }
}

/// Queue of pending completions
pub struct EventLoop {
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run a single queued completion. Returns false when the queue is empty.
    pub fn run_once(&self) -> bool {
        // The receiver lock is released before the task runs; tasks may post.
        let next = self.rx.lock().try_recv();
        match next {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Run completions until the queue is empty, including any posted by
    /// the completions themselves. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        if ran > 0 {
            debug!("Event loop ran {} completions", ran);
        }
        ran
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_posted_tasks_run_only_when_drained() {
        let events = EventLoop::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        events.handle().post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(events.run_until_idle(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(events.run_until_idle(), 0);
    }

    #[test]
    fn test_tasks_posted_by_tasks_run_in_same_drain() {
        let events = EventLoop::new();
        let handle = events.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let inner = handle.clone();
        handle.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            inner.post(move || {
                c.fetch_add(10, Ordering::SeqCst);
            });
        });

        assert_eq!(events.run_until_idle(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_posts_from_spawned_tasks() {
        let events = EventLoop::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..4 {
            let handle = events.handle();
            let c = counter.clone();
            joins.push(tokio::spawn(async move {
                handle.post(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(events.run_until_idle(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
