//! Fair asynchronous counting semaphore.
//!
//! Permits live in a ledger guarded by a short critical section; tasks that
//! cannot be served immediately queue in a strict-FIFO wait list. Releasing
//! permits grants from the head of the queue only, so a later single-permit
//! acquisition can never overtake an earlier multi-permit one, no matter how
//! many permits are available.
//!
//! | Operation | Queues? | Grants out of order? |
//! |-----------|---------|----------------------|
//! | [`acquire`](AsyncSemaphore::acquire) | yes, behind all earlier waiters | never |
//! | [`try_acquire`](AsyncSemaphore::try_acquire) | never | never (fails if anyone is queued) |
//! | [`drain_permits`](AsyncSemaphore::drain_permits) | never | n/a |
//!
//! Multi-permit acquisition is all-or-nothing: a waiter for `n` permits
//! either gets all `n` in one grant or keeps waiting; it never holds a
//! partial reservation.

use std::{
    pin::Pin,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::waitlist::{Key, Removed, WaitList};

/// An asynchronous counting semaphore with strict-FIFO admission.
///
/// [`acquire`](Self::acquire) never blocks a thread: it returns a future
/// that settles once the requested permits have been reserved. Completion
/// runs through the waiting task's waker, on whichever thread performed the
/// matching [`release`](Self::release).
///
/// # Example
///
/// ```
/// use attesa::AsyncSemaphore;
///
/// let sem = AsyncSemaphore::new(3);
/// assert!(sem.try_acquire(2));
/// assert_eq!(sem.available_permits(), 1);
/// sem.release(2);
/// assert_eq!(sem.available_permits(), 3);
/// ```
pub struct AsyncSemaphore {
    state: Mutex<State>,
}

struct State {
    available: usize,
    /// Pending acquisitions, oldest first, each carrying its permit count.
    waiters: WaitList<usize, ()>,
}

impl AsyncSemaphore {
    /// Largest permit count the ledger can hold.
    pub const MAX_PERMITS: usize = usize::MAX >> 3;

    /// Creates a semaphore holding `permits` permits.
    ///
    /// # Panics
    ///
    /// If `permits` exceeds [`MAX_PERMITS`](Self::MAX_PERMITS).
    pub fn new(permits: usize) -> Self {
        assert!(
            permits <= Self::MAX_PERMITS,
            "permit count exceeds MAX_PERMITS"
        );
        Self {
            state: Mutex::new(State {
                available: permits,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Reserves `n` permits.
    ///
    /// The acquisition is armed inside this call, not at first poll: if `n`
    /// permits are available and nobody is queued, they are deducted
    /// immediately; otherwise a waiter is enqueued at the tail before the
    /// future is returned, and later acquisitions line up behind it even if
    /// it is never polled.
    ///
    /// `acquire(0)` completes immediately when the queue is empty and
    /// otherwise waits its turn, which makes it usable as a fairness
    /// barrier.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future cancels the acquisition. Permits that were
    /// granted to a future dropped before observing them go back to the
    /// ledger and are re-offered to the queue; they are never lost.
    pub fn acquire(&self, n: usize) -> AcquireFuture<'_> {
        let stage = {
            let mut state = self.state.lock();
            if state.waiters.is_empty() && state.available >= n {
                state.available -= n;
                Stage::Granted
            } else {
                Stage::Queued(state.waiters.push_back(n))
            }
        };
        AcquireFuture {
            semaphore: self,
            requested: n,
            stage,
        }
    }

    /// Reserves `n` permits only if that is possible without queueing.
    ///
    /// Fails whenever a waiter is queued, even if enough permits are
    /// available right now: granting past the queue would break FIFO
    /// admission.
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.available >= n {
            state.available -= n;
            true
        } else {
            false
        }
    }

    /// Returns `n` permits to the ledger, then grants queued acquisitions
    /// from the head for as long as their requests fit.
    ///
    /// # Panics
    ///
    /// If the ledger would exceed [`MAX_PERMITS`](Self::MAX_PERMITS).
    pub fn release(&self, n: usize) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.lock();
            state.credit(n);
            state.grant(&mut woken);
        }
        for waker in woken {
            waker.wake();
        }
    }

    /// Removes and returns every currently available permit. Never queues.
    ///
    /// Queued waiters are unaffected (they were not going to be served by
    /// the drained permits anyway, or they would already have been granted).
    pub fn drain_permits(&self) -> usize {
        let mut state = self.state.lock();
        std::mem::take(&mut state.available)
    }

    /// Currently available (unreserved) permits.
    pub fn available_permits(&self) -> usize {
        self.state.lock().available
    }

    /// Number of pending acquisitions.
    pub fn queue_len(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl std::fmt::Debug for AsyncSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncSemaphore")
            .field("available", &state.available)
            .field("queued", &state.waiters.len())
            .finish()
    }
}

impl State {
    fn credit(&mut self, n: usize) {
        // `available` never exceeds MAX_PERMITS, so the subtraction is safe
        assert!(
            n <= AsyncSemaphore::MAX_PERMITS - self.available,
            "permit ledger overflow: exceeds MAX_PERMITS"
        );
        self.available += n;
    }

    /// Settles queued acquisitions from the head while their requests fit.
    fn grant(&mut self, woken: &mut Vec<Waker>) {
        while let Some(&requested) = self.waiters.front() {
            if requested > self.available {
                break;
            }
            self.available -= requested;
            if let Some(Some(waker)) = self.waiters.settle_front_with(|_| ()) {
                woken.push(waker);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    /// Fast path: permits were deducted at creation, not yet observed.
    Granted,
    Queued(Key),
    Done,
}

/// Future returned by [`AsyncSemaphore::acquire`].
///
/// Settles to `()` once the requested permits are reserved.
#[must_use = "the acquisition is queued on creation; drop the future to cancel it"]
pub struct AcquireFuture<'a> {
    semaphore: &'a AsyncSemaphore,
    requested: usize,
    stage: Stage,
}

/// Safe: the struct is not self-referential:
/// future fields are not pointing to other fields within the same struct
impl Unpin for AcquireFuture<'_> {}

impl Future for AcquireFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.stage {
            Stage::Granted => {
                self.stage = Stage::Done;
                Poll::Ready(())
            }
            Stage::Queued(key) => {
                let claimed = {
                    let mut state = self.semaphore.state.lock();
                    match state.waiters.claim(key) {
                        Some(()) => true,
                        None => {
                            state.waiters.update_waker(key, cx.waker());
                            false
                        }
                    }
                };
                if claimed {
                    self.stage = Stage::Done;
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
            Stage::Done => panic!("AcquireFuture polled after completion"),
        }
    }
}

impl Drop for AcquireFuture<'_> {
    fn drop(&mut self) {
        let mut woken = Vec::new();
        match self.stage {
            Stage::Done => return,
            Stage::Granted => {
                // reserved at creation but never observed: hand the permits back
                let mut state = self.semaphore.state.lock();
                state.credit(self.requested);
                state.grant(&mut woken);
            }
            Stage::Queued(key) => {
                let mut state = self.semaphore.state.lock();
                match state.waiters.remove(key) {
                    // still queued: nothing was ever deducted
                    Removed::Queued(_) => {}
                    // a release granted us concurrently: return the permits
                    Removed::Settled(()) => {
                        state.credit(self.requested);
                        state.grant(&mut woken);
                    }
                }
            }
        }
        for waker in woken {
            waker.wake();
        }
    }
}
