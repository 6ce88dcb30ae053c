use std::{
    sync::atomic::{AtomicBool, Ordering},
    task::Waker,
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::{
    mpsc::{error::SendError, shared::Shared},
    waitlist::{Key, Removed, WaitList},
};

/// Admission gate of a bounded queue.
///
/// This is the fair-semaphore skeleton with the waiter payload instantiated
/// as the item being sent: a ledger of `capacity` permits plus a FIFO of
/// senders waiting for one, each carrying its value. A permit is taken when
/// a send is *accepted* (its value enters the queue) and returned when the
/// consumer takes delivery of a value, so accepted-but-unconsumed values
/// never exceed `capacity`.
///
/// Granting runs on the releasing thread: whoever frees a permit also
/// forwards the head sender's value into the queue, so a sending task need
/// not be polled for its value to travel.
///
/// Lock order: the gate mutex is taken before, never after, the value
/// queue's mutex.
pub(super) struct Gate<T> {
    state: Mutex<GateState<T>>,
    capacity: usize,
    /// Sticky: set by `terminate`, consumer close, or last-sender drop.
    /// Mutated only under the gate mutex.
    closed: CachePadded<AtomicBool>,
}

struct GateState<T> {
    /// Unused capacity.
    available: usize,
    /// Senders waiting for capacity, oldest first, each carrying its item.
    senders: WaitList<T, Result<(), SendError<T>>>,
    /// Termination has been requested; completes once the ledger is whole.
    draining: bool,
    drained: bool,
    /// Observers of drain completion (termination futures).
    drain_waiters: WaitList<(), ()>,
}

/// How a send fared at creation.
pub(super) enum Admission<T> {
    /// Permit taken, value already in the queue.
    Accepted,
    /// The gate was closed; the value comes back.
    Rejected(T),
    /// Queued behind older senders, value travelling with the waiter.
    Queued(Key),
}

impl<T> Gate<T> {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: capacity,
                senders: WaitList::new(),
                draining: false,
                drained: false,
                drain_waiters: WaitList::new(),
            }),
            capacity,
            closed: CachePadded::new(AtomicBool::new(false)),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs at `send` creation: accept the value straight into the queue,
    /// enqueue the sender, or reject on a closed gate.
    pub(super) fn admit(&self, shared: &Shared<T>, value: T) -> Admission<T> {
        if self.is_closed() {
            return Admission::Rejected(value);
        }
        let (admission, waker) = {
            let mut state = self.state.lock();
            // closed flips only under this lock; re-check now that we hold it
            if self.closed.load(Ordering::Relaxed) {
                return Admission::Rejected(value);
            }
            if state.senders.is_empty() && state.available > 0 {
                state.available -= 1;
                // gate lock held across the push: acceptance order is
                // delivery order
                let waker = shared.state.lock().push_value(value);
                (Admission::Accepted, waker)
            } else {
                (Admission::Queued(state.senders.push_back(value)), None)
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        admission
    }

    /// Returns one permit and forwards newly admitted values. Runs after a
    /// value is handed to the consumer.
    pub(super) fn release_one(&self, shared: &Shared<T>) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.lock();
            if state.drained {
                // ledger already reconciled by a consumer-side close
                return;
            }
            state.available += 1;
            Self::grant_locked(&mut state, shared, &mut woken);
            self.check_drained_locked(&mut state, shared, &mut woken);
        }
        for waker in woken {
            waker.wake();
        }
    }

    /// Graceful producer-side termination: sends that start after this call
    /// are rejected, queued sends stay in line and complete. Idempotent.
    pub(super) fn begin_drain(&self, shared: &Shared<T>) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.lock();
            self.closed.store(true, Ordering::Release);
            state.draining = true;
            self.check_drained_locked(&mut state, shared, &mut woken);
        }
        for waker in woken {
            waker.wake();
        }
    }

    /// As [`begin_drain`](Self::begin_drain), returning the waiter key for
    /// a termination future, or `None` if the drain is already complete.
    pub(super) fn begin_drain_observed(&self, shared: &Shared<T>) -> Option<Key> {
        let mut woken = Vec::new();
        let key = {
            let mut state = self.state.lock();
            self.closed.store(true, Ordering::Release);
            state.draining = true;
            self.check_drained_locked(&mut state, shared, &mut woken);
            if state.drained {
                None
            } else {
                Some(state.drain_waiters.push_back(()))
            }
        };
        for waker in woken {
            waker.wake();
        }
        key
    }

    /// Consumer-side shutdown: queued senders settle with their values
    /// handed back, the drain completes (nothing further will be consumed,
    /// so the ledger is declared whole), and the value queue terminates.
    /// Values already accepted stay consumable.
    pub(super) fn close(&self, shared: &Shared<T>) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.lock();
            if state.drained {
                return;
            }
            self.closed.store(true, Ordering::Release);
            state
                .senders
                .settle_all_with(|value| Err(SendError(value)), &mut woken);
            state.available = self.capacity;
            state.draining = true;
            state.drained = true;
            {
                let mut queue = shared.state.lock();
                shared.terminate_locked(&mut queue, &mut woken);
            }
            state.drain_waiters.settle_all_with(|()| (), &mut woken);
        }
        for waker in woken {
            waker.wake();
        }
    }

    /// Send-future poll: claim the outcome or re-register the waker.
    pub(super) fn poll_send(&self, key: Key, waker: &Waker) -> Option<Result<(), SendError<T>>> {
        let mut state = self.state.lock();
        match state.senders.claim(key) {
            Some(outcome) => Some(outcome),
            None => {
                state.senders.update_waker(key, waker);
                None
            }
        }
    }

    /// Abandoned send future: a still-queued value is withdrawn and dropped
    /// with the future; an accepted one is already in the queue and stays.
    pub(super) fn cancel_send(&self, shared: &Shared<T>, key: Key) {
        let mut woken = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.senders.remove(key);
            self.check_drained_locked(&mut state, shared, &mut woken);
            removed
        };
        // user destructors run outside the lock
        drop(removed);
        for waker in woken {
            waker.wake();
        }
    }

    /// Termination-future poll.
    pub(super) fn poll_drained(&self, key: Key, waker: &Waker) -> bool {
        let mut state = self.state.lock();
        match state.drain_waiters.claim(key) {
            Some(()) => true,
            None => {
                state.drain_waiters.update_waker(key, waker);
                false
            }
        }
    }

    pub(super) fn cancel_drain_waiter(&self, key: Key) {
        match self.state.lock().drain_waiters.remove(key) {
            Removed::Queued(()) | Removed::Settled(()) => {}
        }
    }

    /// Moves queued senders into the value queue while capacity lasts.
    fn grant_locked(state: &mut GateState<T>, shared: &Shared<T>, woken: &mut Vec<Waker>) {
        while state.available > 0 && !state.senders.is_empty() {
            state.available -= 1;
            let sender_waker = state.senders.settle_front_with(|value| {
                let mut queue = shared.state.lock();
                if let Some(waker) = queue.push_value(value) {
                    woken.push(waker);
                }
                Ok(())
            });
            if let Some(Some(waker)) = sender_waker {
                woken.push(waker);
            }
        }
    }

    /// The drain completes when the ledger is whole again: every accepted
    /// value consumed and nobody queued. By FIFO admission that is exactly
    /// "every send accepted before termination has been consumed".
    fn check_drained_locked(
        &self,
        state: &mut GateState<T>,
        shared: &Shared<T>,
        woken: &mut Vec<Waker>,
    ) {
        if !state.draining || state.drained {
            return;
        }
        if state.available == self.capacity && state.senders.is_empty() {
            state.drained = true;
            {
                let mut queue = shared.state.lock();
                shared.terminate_locked(&mut queue, woken);
            }
            state.drain_waiters.settle_all_with(|()| (), woken);
        }
    }
}
