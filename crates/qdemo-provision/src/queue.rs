//! FIFO task queue shared by the worker pool.
//!
//! Producers enqueue while seeding and then [`TaskQueue::close`] the queue.
//! Consumers call [`TaskQueue::try_dequeue`], which waits at most the given
//! timeout and tells a timed-out wait ([`Dequeued::Empty`]) apart from a
//! queue that is closed and has nothing left ([`Dequeued::Drained`]).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Result of [`TaskQueue::try_dequeue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// The head task; the caller now owns it.
    Task(T),
    /// Nothing arrived within the timeout, but the queue is still open.
    Empty,
    /// The queue is closed and empty; nothing will ever arrive.
    Drained,
}

#[derive(Debug)]
struct Inner<T> {
    tasks: VecDeque<T>,
    closed: bool,
}

/// Multi-producer, multi-consumer FIFO queue.
#[derive(Debug)]
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> TaskQueue<T> {
    /// An open, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// A closed queue holding `tasks` in order.
    pub fn seeded(tasks: impl IntoIterator<Item = T>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: tasks.into_iter().collect(),
                closed: true,
            }),
            notify: Notify::new(),
        }
    }

    /// Append `task` to the tail. Returns `false` if the queue is closed.
    pub async fn enqueue(&self, task: T) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }
        inner.tasks.push_back(task);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Mark seeding finished and wake every waiting consumer.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Remove the head task, waiting up to `timeout` for one to arrive.
    pub async fn try_dequeue(&self, timeout: Duration) -> Dequeued<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(task) = inner.tasks.pop_front() {
                    let more = !inner.tasks.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Dequeued::Task(task);
                }
                if inner.closed {
                    return Dequeued::Drained;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Dequeued::Empty;
            }
        }
    }

    /// Tasks currently queued.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// Whether no tasks are queued.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.tasks.is_empty()
    }

    /// Whether the queue is closed and empty.
    pub async fn is_drained(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.closed && inner.tasks.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TaskQueue::seeded(0..5);
        for expected in 0..5 {
            assert_eq!(
                queue.try_dequeue(Duration::from_millis(10)).await,
                Dequeued::Task(expected)
            );
        }
        assert_eq!(
            queue.try_dequeue(Duration::from_millis(10)).await,
            Dequeued::Drained
        );
    }

    #[tokio::test]
    async fn test_closed_empty_queue_returns_drained_without_waiting() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        queue.close().await;
        let start = std::time::Instant::now();
        assert_eq!(
            queue.try_dequeue(Duration::from_secs(30)).await,
            Dequeued::Drained
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(queue.is_drained().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_empty_queue_times_out() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert_eq!(
            queue.try_dequeue(Duration::from_secs(30)).await,
            Dequeued::Empty
        );
        assert!(!queue.is_drained().await);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_rejected() {
        let queue = TaskQueue::new();
        assert!(queue.enqueue(1).await);
        queue.close().await;
        assert!(!queue.enqueue(2).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.try_dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("dir00000").await;
        assert_eq!(consumer.await.unwrap(), Dequeued::Task("dir00000"));
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_close() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.try_dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;
        assert_eq!(consumer.await.unwrap(), Dequeued::Drained);
    }

    async fn drain_concurrently(tasks: usize, workers: usize) -> Vec<usize> {
        let queue = Arc::new(TaskQueue::seeded(0..tasks));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut taken = Vec::new();
                    while let Dequeued::Task(task) =
                        queue.try_dequeue(Duration::from_millis(50)).await
                    {
                        taken.push(task);
                        tokio::task::yield_now().await;
                    }
                    taken
                })
            })
            .collect();
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_take_each_task_once() {
        let all = drain_concurrently(2000, 50).await;
        assert_eq!(all.len(), 2000);
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 2000);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_task_dequeued_exactly_once(tasks in 0usize..300, workers in 1usize..16) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let mut all = runtime.block_on(drain_concurrently(tasks, workers));
            all.sort_unstable();
            prop_assert_eq!(all, (0..tasks).collect::<Vec<_>>());
        }
    }
}
