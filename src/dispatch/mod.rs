//! Bounded worker pools for chapters and remote requests.
//!
//! A [`WorkerPool`] owns a dedicated rayon thread pool of fixed width. Jobs
//! submitted together run concurrently up to that width and their results come
//! back in submission order, whatever order they finish in.
//!
//! Two pools are used by the document run: one of `workers` threads over
//! chapters and one of `workers * 5` threads shared by every chapter's remote
//! requests. A chapter thread blocks while its requests run on the other pool,
//! so the two never compete for the same threads.

use miette::Diagnostic;
use rayon::prelude::*;
use thiserror::Error;

/// Errors specific to the dispatch subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("worker pool width must be at least 1")]
    #[diagnostic(
        code(marginalia::dispatch::zero_width),
        help("Set `pipeline.workers` to a positive number.")
    )]
    ZeroWidth,

    #[error("failed to build the {name} pool: {message}")]
    #[diagnostic(
        code(marginalia::dispatch::build),
        help("The operating system refused to spawn worker threads. Lower `pipeline.workers`.")
    )]
    Build { name: String, message: String },
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// A fixed-width pool of worker threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    name: String,
    width: usize,
}

impl WorkerPool {
    /// Build a pool named `name` with `width` threads (`{name}-worker-{i}`).
    pub fn new(name: &str, width: usize) -> DispatchResult<Self> {
        if width == 0 {
            return Err(DispatchError::ZeroWidth);
        }
        let thread_prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(move |i| format!("{thread_prefix}-worker-{i}"))
            .build()
            .map_err(|e| DispatchError::Build {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(pool = name, width, "worker pool ready");
        Ok(Self {
            pool,
            name: name.to_string(),
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every job and return their results in submission order.
    ///
    /// Fails with the first error observed; once one job fails, jobs that have
    /// not started yet may be skipped. A job that already started runs to
    /// completion.
    pub fn run_all<T, E, F>(&self, jobs: Vec<F>) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
        F: FnOnce() -> Result<T, E> + Send,
    {
        self.pool
            .install(|| jobs.into_par_iter().map(|job| job()).collect())
    }

    /// Apply `f` to every item and return the outputs in input order.
    pub fn map_all<I, R, F>(&self, items: Vec<I>, f: F) -> Vec<R>
    where
        I: Send,
        R: Send,
        F: Fn(I) -> R + Sync + Send,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("width", &self.width)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    type Job<'a> = Box<dyn FnOnce() -> Result<usize, String> + Send + 'a>;

    #[test]
    fn results_follow_submission_order() {
        let pool = WorkerPool::new("test", 4).unwrap();
        // Earlier jobs sleep longer, so they finish last.
        let jobs: Vec<Job> = (0..4usize)
            .map(|i| {
                Box::new(move || {
                    thread::sleep(Duration::from_millis(10 * (4 - i as u64)));
                    Ok(i * 10)
                }) as Job
            })
            .collect();
        assert_eq!(pool.run_all(jobs).unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn an_error_is_surfaced() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let jobs: Vec<Job> = vec![
            Box::new(|| Ok(1usize)) as Job,
            Box::new(|| Err("backend unreachable".to_string())) as Job,
            Box::new(|| Ok(3usize)) as Job,
        ];
        assert_eq!(pool.run_all(jobs).unwrap_err(), "backend unreachable");
    }

    #[test]
    fn width_bounds_concurrency() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let outputs = pool.map_all((0..8).collect(), |i: usize| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            i * 2
        });
        assert_eq!(outputs, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn threads_are_named() {
        let pool = WorkerPool::new("chapters", 1).unwrap();
        let names = pool.map_all(vec![()], |_| {
            thread::current().name().map(str::to_string)
        });
        assert_eq!(names, vec![Some("chapters-worker-0".to_string())]);
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(matches!(
            WorkerPool::new("test", 0),
            Err(DispatchError::ZeroWidth)
        ));
    }
}
