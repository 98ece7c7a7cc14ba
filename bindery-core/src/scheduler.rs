use crate::{ExecutionError, Options, Result, lock};
use std::{
    any::Any,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};
use tokio::runtime::{Builder, Runtime};

/// Work submission facility owned by a connection.
///
/// Every streamed slot schedules one unit of work per execute/fetch cycle,
/// the work runs on the blocking pool of a dedicated tokio runtime so that
/// it can sit on a pipe read or write without starving anything else.
/// Streamed units block on each other through their pipes, so once the pool
/// is fully occupied new work gets a thread of its own instead of queueing
/// behind work that may be waiting for it.
#[derive(Debug)]
pub struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    pool_size: usize,
    pooled: Arc<AtomicUsize>,
}

/// Holds one place of the blocking pool until the work is over.
struct PoolPlace(Arc<AtomicUsize>);

impl Drop for PoolPlace {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Scheduler {
    pub fn new(options: &Options) -> Result<Self> {
        let pool_size = options.max_blocking_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .max_blocking_threads(pool_size)
            .thread_name("bindery-scheduler")
            .build()
            .map_err(|e| {
                let error = ExecutionError::Io(e);
                log::error!("Could not start the scheduler: {}", error);
                error
            })?;
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            pool_size,
            pooled: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Submit `work`, the returned [`Task`] resolves to its outcome.
    ///
    /// The work starts right away, either on the blocking pool or, when
    /// every pool thread is taken, on a dedicated thread.
    pub fn schedule<T, F>(&self, work: F) -> Result<Task<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let runtime = lock(&self.runtime);
        let Some(runtime) = runtime.as_ref() else {
            return Err(ExecutionError::Closed("scheduler").into());
        };
        if self.pooled.fetch_add(1, Ordering::AcqRel) < self.pool_size {
            let place = PoolPlace(self.pooled.clone());
            let handle = runtime.spawn_blocking(move || {
                let _place = place;
                work()
            });
            return Ok(Task {
                handle: Handle::Pooled(handle),
            });
        }
        self.pooled.fetch_sub(1, Ordering::AcqRel);
        log::debug!(
            "All the {} threads of the blocking pool are taken, the work gets its own thread",
            self.pool_size
        );
        let handle = thread::Builder::new()
            .name("bindery-transform".into())
            .spawn(work)
            .map_err(|e| {
                let error = ExecutionError::Io(e);
                log::error!("Could not start a transform thread: {}", error);
                error
            })?;
        Ok(Task {
            handle: Handle::Dedicated(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runtime).is_some()
    }

    /// Units of work currently holding a thread of the blocking pool.
    pub fn pooled(&self) -> usize {
        self.pooled.load(Ordering::Acquire)
    }

    /// Stops accepting work and waits at most `timeout` for the outstanding
    /// tasks, the ones still running after that are abandoned.
    pub fn shutdown(&self, timeout: Duration) {
        let runtime = lock(&self.runtime).take();
        if let Some(runtime) = runtime {
            log::debug!("Shutting down the scheduler (timeout {:?})", timeout);
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

#[derive(Debug)]
enum Handle<T> {
    Pooled(tokio::task::JoinHandle<anyhow::Result<T>>),
    Dedicated(thread::JoinHandle<anyhow::Result<T>>),
}

/// Handle to the eventual outcome of a scheduled unit of work.
#[derive(Debug)]
pub struct Task<T> {
    handle: Handle<T>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>")
}

impl<T> Task<T> {
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Handle::Pooled(v) => v.is_finished(),
            Handle::Dedicated(v) => v.is_finished(),
        }
    }

    /// Blocks until the work is done.
    ///
    /// A failure returned by the work becomes [`ExecutionError::Transform`],
    /// a panic or a cancellation becomes [`ExecutionError::Task`].
    pub fn join(self) -> Result<T> {
        let outcome = match self.handle {
            Handle::Pooled(handle) => {
                futures::executor::block_on(handle).map_err(|e| e.to_string())
            }
            Handle::Dedicated(handle) => handle.join().map_err(|e| {
                format!("task panicked with message {:?}", panic_message(e.as_ref()))
            }),
        };
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ExecutionError::Transform(e).into()),
            Err(e) => Err(ExecutionError::Task(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use crate::{Error, ExecutionError, Options};
    use anyhow::anyhow;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn many_outstanding_tasks() {
        let scheduler = Scheduler::new(&Options::default()).unwrap();
        let tasks = (0..200)
            .map(|i| scheduler.schedule(move || Ok(i * 2)).unwrap())
            .collect::<Vec<_>>();
        let sum: i32 = tasks.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(sum, (0..200).map(|i| i * 2).sum());
    }

    #[test]
    fn failure_is_deferred_to_join() {
        let scheduler = Scheduler::new(&Options::default()).unwrap();
        let task = scheduler
            .schedule::<(), _>(|| Err(anyhow!("bad input")))
            .unwrap();
        let error = task.join().unwrap_err();
        assert!(matches!(
            error,
            Error::Execution(ExecutionError::Transform(..))
        ));
        assert!(error.to_string().contains("bad input"));
    }

    #[test]
    fn panic_is_reported() {
        let scheduler = Scheduler::new(&Options::default()).unwrap();
        let task = scheduler
            .schedule::<(), _>(|| panic!("transform panicked"))
            .unwrap();
        assert!(matches!(
            task.join(),
            Err(Error::Execution(ExecutionError::Task(..)))
        ));
    }

    #[test]
    fn no_work_after_shutdown() {
        let scheduler = Scheduler::new(&Options::default()).unwrap();
        scheduler.shutdown(Duration::from_millis(100));
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.schedule(|| Ok(())),
            Err(Error::Execution(ExecutionError::Closed(..)))
        ));
    }

    #[test]
    fn saturated_pool_does_not_starve() {
        let scheduler = Scheduler::new(&Options {
            max_blocking_threads: 1,
            ..Default::default()
        })
        .unwrap();
        let (sender, receiver) = mpsc::channel::<i32>();
        // Takes the only pool thread until the second task runs
        let waiting = scheduler.schedule(move || Ok(receiver.recv()?)).unwrap();
        assert_eq!(scheduler.pooled(), 1);
        let sending = scheduler
            .schedule(move || {
                sender.send(7)?;
                Ok(())
            })
            .unwrap();
        sending.join().unwrap();
        assert_eq!(waiting.join().unwrap(), 7);
        assert_eq!(scheduler.pooled(), 0);
    }

    #[test]
    fn dedicated_thread_panic_is_reported() {
        let scheduler = Scheduler::new(&Options {
            max_blocking_threads: 1,
            ..Default::default()
        })
        .unwrap();
        let (sender, receiver) = mpsc::channel::<()>();
        let waiting = scheduler.schedule(move || Ok(receiver.recv()?)).unwrap();
        let task = scheduler
            .schedule::<(), _>(|| panic!("transform panicked"))
            .unwrap();
        let error = task.join().unwrap_err();
        assert!(matches!(error, Error::Execution(ExecutionError::Task(..))));
        assert!(error.to_string().contains("transform panicked"));
        sender.send(()).unwrap();
        waiting.join().unwrap();
    }
}
