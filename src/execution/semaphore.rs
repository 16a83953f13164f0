use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A small, blocking counting semaphore.
///
/// Bounds the number of chunks submitted to the pool but not yet finished.
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    /// `permits` must be > 0; the orchestrator validates this before construction.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Acquire one permit, blocking until available.
    ///
    /// Returns the permit and the time spent waiting (zero if no wait was required).
    pub fn acquire(sem: &Arc<Self>) -> (Permit, Duration) {
        let start = Instant::now();
        let mut waited = false;
        let mut g = sem.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *g == 0 {
            waited = true;
            g = sem.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        *g -= 1;
        drop(g);

        let permit = Permit {
            sem: Arc::clone(sem),
        };
        (permit, if waited { start.elapsed() } else { Duration::ZERO })
    }

    fn release(&self) {
        let mut g = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *g += 1;
        self.cv.notify_one();
    }
}

/// One acquired permit; released on drop, including during unwinding.
pub struct Permit {
    sem: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.sem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::Semaphore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn blocks_until_a_permit_is_dropped() {
        let sem = Arc::new(Semaphore::new(1));
        let (first, waited) = Semaphore::acquire(&sem);
        assert_eq!(waited, Duration::ZERO);

        let released = Arc::new(AtomicBool::new(false));
        let sem2 = Arc::clone(&sem);
        let released2 = Arc::clone(&released);
        let handle = std::thread::spawn(move || {
            let _permit = Semaphore::acquire(&sem2);
            released2.load(Ordering::SeqCst)
        });

        std::thread::sleep(Duration::from_millis(20));
        released.store(true, Ordering::SeqCst);
        drop(first);
        assert!(handle.join().unwrap());
    }
}
