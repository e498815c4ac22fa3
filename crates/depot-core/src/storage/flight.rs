//! Keyed single-flight groups for read coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

/// Collapses concurrent calls for the same key into one execution.
///
/// The first caller for a key becomes the leader and runs the work; every
/// concurrent caller for the same key waits and receives a clone of the
/// leader's result. Distinct keys never block each other.
pub struct FlightGroup<T: Clone> {
    inflight: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T: Clone> Default for FlightGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FlightGroup<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys with a read currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> FlightGroup<T> {
    /// Run `work` for `key`, coalescing with any in-flight execution.
    ///
    /// Returns the result and whether this caller was the leader that
    /// performed the physical work. If a leader is dropped before
    /// publishing (its task was cancelled), a waiter promotes itself and
    /// re-executes, so `work` must be safe to call more than once.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (T, bool)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        enum Role<T> {
            Leader(watch::Sender<Option<T>>),
            Waiter(watch::Receiver<Option<T>>),
        }

        loop {
            let role = {
                let mut inflight = self.inflight.lock().unwrap();
                if let Some(rx) = inflight.get(key) {
                    Role::Waiter(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => {
                    let _guard = RemoveOnDrop { group: self, key };
                    let value = work().await;
                    let _ = tx.send(Some(value.clone()));
                    return (value, true);
                }
                Role::Waiter(mut rx) => loop {
                    let published = rx.borrow().clone();
                    if let Some(value) = published {
                        return (value, false);
                    }
                    if rx.changed().await.is_err() {
                        // Leader vanished without publishing; one last look,
                        // then retry (possibly as the new leader).
                        if let Some(value) = rx.borrow().clone() {
                            return (value, false);
                        }
                        break;
                    }
                },
            }
        }
    }
}

struct RemoveOnDrop<'a, T: Clone> {
    group: &'a FlightGroup<T>,
    key: &'a str,
}

impl<T: Clone> Drop for RemoveOnDrop<'_, T> {
    fn drop(&mut self) {
        self.group.inflight.lock().unwrap().remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let group = Arc::new(FlightGroup::<u64>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let group = Arc::clone(&group);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                group
                    .run("same-key", || {
                        let executions = Arc::clone(&executions);
                        async move {
                            executions.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            42u64
                        }
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let (value, leader) = handle.await.unwrap();
            assert_eq!(value, 42);
            if leader {
                leaders += 1;
            }
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let group = Arc::new(FlightGroup::<String>::new());

        let a = group.run("a", || async { "alpha".to_string() });
        let b = group.run("b", || async { "beta".to_string() });
        let (ra, rb) = tokio::join!(a, b);

        assert_eq!(ra.0, "alpha");
        assert_eq!(rb.0, "beta");
        assert!(ra.1 && rb.1);
    }

    #[tokio::test]
    async fn test_sequential_calls_each_execute() {
        let group = FlightGroup::<u32>::new();
        let executions = AtomicUsize::new(0);

        for _ in 0..3 {
            let (_, leader) = group
                .run("key", || async {
                    executions.fetch_add(1, Ordering::SeqCst);
                    7u32
                })
                .await;
            assert!(leader);
        }

        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_waiter_promotes_after_cancelled_leader() {
        let group = Arc::new(FlightGroup::<u8>::new());

        let leader = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                group
                    .run("key", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1u8
                    })
                    .await
            })
        };

        // Give the leader time to register, then kill it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let (value, _) = group.run("key", || async { 2u8 }).await;
        assert_eq!(value, 2);
    }
}
