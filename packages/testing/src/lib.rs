#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests and benchmarks in picture pool packages.

use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout, so a deadlocked pool fails the test instead of hanging it.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where thread
/// synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly. This allows mutation testing to properly
/// detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) or if the test
/// itself panics.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic after sending its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded {timeout:?} timeout, probably deadlocked");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Runs `f` on `thread_count` threads that all start at the same moment.
///
/// Each thread receives its own index. The results are returned in thread index order.
/// This maximizes contention on whatever shared state `f` touches.
///
/// # Panics
///
/// Panics if any of the threads panics.
pub fn run_on_threads<F, R>(thread_count: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let f = Arc::new(f);
    let start = Arc::new(Barrier::new(thread_count));

    let handles = (0..thread_count)
        .map(|index| {
            let f = Arc::clone(&f);
            let start = Arc::clone(&start);

            thread::spawn(move || {
                start.wait();
                f(index)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e),
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn watchdog_returns_result() {
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic]
    fn watchdog_propagates_panic() {
        with_watchdog(|| {
            let value = 1;
            assert_eq!(value, 2, "intentional panic");
        });
    }

    #[test]
    fn threads_return_results_in_index_order() {
        let results = run_on_threads(4, |index| index * 10);

        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[test]
    fn every_thread_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));

        run_on_threads(8, {
            let counter = Arc::clone(&counter);
            move |_| counter.fetch_add(1, Ordering::Relaxed)
        });

        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }
}
