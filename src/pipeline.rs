// ============================================================================
// 并发管道 - 有界线程池 + 单元隔离 + 进度轮询
// ============================================================================
//
// 每个并行阶段的形状都一样:
// 1. 每个输入项提交一个独立单元 (文件 / 方法 / 父类 / 类块)
// 2. 单元失败 (Err 或 panic) 在单元边界被捕获并记录，不影响兄弟单元
// 3. 原子计数器记录完成数，调用线程按固定间隔轮询并通知 ProgressListener
// 4. 所有单元完成后才返回 (阶段屏障)

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::CostError;

/// Result of one parallel stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    pub total: usize,
    pub failed: usize,
}

impl StageOutcome {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

/// Observational side channel; never influences the stage result.
pub trait ProgressListener: Send + Sync {
    fn stage_started(&self, label: &str, total: usize);
    fn progress(&self, label: &str, done: usize, total: usize);
    fn stage_finished(&self, label: &str, outcome: &StageOutcome);
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressListener for SilentProgress {
    fn stage_started(&self, _label: &str, _total: usize) {}
    fn progress(&self, _label: &str, _done: usize, _total: usize) {}
    fn stage_finished(&self, _label: &str, _outcome: &StageOutcome) {}
}

/// `max(2, available cores)`
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2)
}

/// 所有并行阶段共享的有界线程池
pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
    poll_interval: Duration,
    listener: Arc<dyn ProgressListener>,
}

impl WorkerPool {
    pub fn new(threads: Option<usize>, poll_interval: Duration, listener: Arc<dyn ProgressListener>) -> Result<Self, CostError> {
        let threads = threads.unwrap_or_else(default_thread_count).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("java-cost-worker-{i}"))
            .build()
            .map_err(|e| CostError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            threads,
            poll_interval,
            listener,
        })
    }

    /// Silent pool with the default polling interval, for library callers and tests.
    pub fn silent(threads: Option<usize>) -> Result<Self, CostError> {
        Self::new(
            threads,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            Arc::new(SilentProgress),
        )
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `action` once per item and blocks until all of them completed.
    pub fn for_each<T, F>(&self, label: &str, items: &[T], action: F) -> StageOutcome
    where
        T: Sync,
        F: Fn(&T) -> anyhow::Result<()> + Sync,
    {
        self.map(label, items, action).1
    }

    /// Like [`WorkerPool::for_each`], keeping each unit's output in input order.
    /// A failed unit leaves `None` in its slot.
    pub fn map<T, R, F>(&self, label: &str, items: &[T], action: F) -> (Vec<Option<R>>, StageOutcome)
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> anyhow::Result<R> + Sync,
    {
        let total = items.len();
        self.listener.stage_started(label, total);

        let done = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let results = std::thread::scope(|scope| {
            let (finished_tx, finished_rx) = mpsc::channel::<()>();

            let worker = scope.spawn(|| {
                // moved in: a panicking worker disconnects the channel
                let finished_tx = finished_tx;
                let results: Vec<Option<R>> = self.pool.install(|| {
                    items
                        .par_iter()
                        .map(|item| {
                            let result = run_unit(label, || action(item));
                            if result.is_none() {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                            done.fetch_add(1, Ordering::Release);
                            result
                        })
                        .collect()
                });
                let _ = finished_tx.send(());
                results
            });

            // 轮询进度直到屏障
            loop {
                match finished_rx.recv_timeout(self.poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        self.listener.progress(label, done.load(Ordering::Acquire), total);
                    }
                }
            }

            match worker.join() {
                Ok(results) => results,
                Err(payload) => panic::resume_unwind(payload),
            }
        });

        self.listener.progress(label, done.load(Ordering::Acquire), total);
        let outcome = StageOutcome {
            total,
            failed: failed.load(Ordering::Acquire),
        };
        self.listener.stage_finished(label, &outcome);
        (results, outcome)
    }
}

/// 单元边界: Err 与 panic 都记为失败
fn run_unit<R>(label: &str, unit: impl FnOnce() -> anyhow::Result<R>) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(unit)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(stage = label, error = %format!("{e:#}"), "unit failed");
            None
        }
        Err(payload) => {
            warn!(stage = label, panic = panic_message(payload.as_ref()), "unit panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
        last_done: AtomicUsize,
    }

    impl ProgressListener for RecordingProgress {
        fn stage_started(&self, label: &str, total: usize) {
            self.events.lock().unwrap().push(format!("start {label} {total}"));
        }

        fn progress(&self, _label: &str, done: usize, _total: usize) {
            self.last_done.store(done, Ordering::SeqCst);
        }

        fn stage_finished(&self, label: &str, outcome: &StageOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {label} {}/{}", outcome.failed, outcome.total));
        }
    }

    #[test]
    fn test_default_thread_count_at_least_two() {
        assert!(default_thread_count() >= 2);
    }

    #[test]
    fn test_for_each_runs_every_unit() {
        let pool = WorkerPool::silent(Some(4)).unwrap();
        let sum = AtomicUsize::new(0);
        let items: Vec<usize> = (1..=100).collect();
        let outcome = pool.for_each("Summing", &items, |n| {
            sum.fetch_add(*n, Ordering::Relaxed);
            Ok(())
        });
        assert_eq!(outcome, StageOutcome { total: 100, failed: 0 });
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
    }

    #[test]
    fn test_failures_and_panics_are_isolated() {
        let pool = WorkerPool::silent(Some(2)).unwrap();
        let items: Vec<u32> = (0..10).collect();
        let (results, outcome) = pool.map("Mixed", &items, |n| {
            if *n == 3 {
                bail!("bad unit {n}");
            }
            if *n == 7 {
                panic!("boom");
            }
            Ok(n * 10)
        });
        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.succeeded(), 8);
        assert_eq!(results[2], Some(20));
        assert_eq!(results[3], None);
        assert_eq!(results[7], None);
        assert_eq!(results[9], Some(90));
    }

    #[test]
    fn test_listener_sees_full_stage() {
        let listener = Arc::new(RecordingProgress::default());
        let pool = WorkerPool::new(Some(2), Duration::from_millis(5), listener.clone()).unwrap();
        let items = vec![(); 16];
        pool.for_each("Sleeping", &items, |_| {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        });

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start Sleeping 16".to_string(), "finish Sleeping 0/16".to_string()]);
        assert_eq!(listener.last_done.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_empty_stage() {
        let pool = WorkerPool::silent(None).unwrap();
        let items: Vec<u8> = Vec::new();
        let outcome = pool.for_each("Nothing", &items, |_| Ok(()));
        assert_eq!(outcome, StageOutcome::default());
    }
}
