use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    task::Waker,
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::{
    mpsc::{error::SendError, gate::Gate},
    waitlist::WaitList,
};

/// State shared by both halves of a queue.
///
/// The queue is always in one of three modes, and the mutex makes every
/// transition atomic:
///
/// - **idle**: `buffer` and `waiters` both empty
/// - **values buffered**: producers ran ahead of the consumer
/// - **consumers waiting**: the consumer ran ahead of the producers
///
/// The two storages are mutually exclusive: a value is only buffered when
/// no consumer waiter is pending, and a waiter is only enqueued when no
/// value is buffered. A send in the waiting mode settles the oldest waiter
/// directly; a receive in the buffered mode pops the oldest value.
///
/// Wakers collected while the mutex is held are invoked only after it is
/// released: user continuations never run under an internal lock.
pub(super) struct Shared<T> {
    pub(super) state: Mutex<State<T>>,
    /// Mirrors `State::terminated` for lock-free fast paths.
    terminated: CachePadded<AtomicBool>,
    /// Live producer handles; the queue terminates when the last one drops.
    senders: CachePadded<AtomicUsize>,
    /// Admission gate, present only on bounded queues.
    pub(super) gate: Option<Gate<T>>,
}

pub(super) struct State<T> {
    buffer: VecDeque<T>,
    pub(super) waiters: WaitList<(), Option<T>>,
    pub(super) terminated: bool,
}

impl<T> Shared<T> {
    pub(super) fn new(gate: Option<Gate<T>>) -> Self {
        Self {
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                waiters: WaitList::new(),
                terminated: false,
            }),
            terminated: CachePadded::new(AtomicBool::new(false)),
            senders: CachePadded::new(AtomicUsize::new(1)),
            gate,
        }
    }

    #[inline]
    pub(super) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Number of values currently buffered (delivered-but-unobserved values
    /// travelling inside a receive future are not counted).
    pub(super) fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Producer path of the unbounded queue: deliver to the oldest waiter,
    /// or buffer. `Err` hands the value back iff the queue is terminated.
    pub(super) fn send_value(&self, value: T) -> Result<(), SendError<T>> {
        let waker = {
            let mut state = self.state.lock();
            if state.terminated {
                return Err(SendError(value));
            }
            state.push_value(value)
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Returns a fulfillment claimed by a cancelled receive. It re-enters
    /// at the oldest position: the head waiter if one is pending, else the
    /// buffer front. This runs even on a terminated queue: the value was
    /// accepted before termination and stays consumable.
    pub(super) fn requeue_value(&self, value: T) {
        let waker = {
            let mut state = self.state.lock();
            if state.waiters.is_empty() {
                state.buffer.push_front(value);
                None
            } else {
                state.waiters.settle_front_with(|()| Some(value)).flatten()
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Sticky termination: future sends are rejected and every pending
    /// consumer waiter settles with the end-of-stream sentinel right away.
    /// Values already buffered stay consumable. Idempotent.
    pub(super) fn terminate(&self) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.lock();
            self.terminate_locked(&mut state, &mut woken);
        }
        for waker in woken {
            waker.wake();
        }
    }

    pub(super) fn terminate_locked(&self, state: &mut State<T>, woken: &mut Vec<Waker>) {
        if state.terminated {
            return;
        }
        state.terminated = true;
        self.terminated.store(true, Ordering::Release);
        state.waiters.settle_all_with(|()| None, woken);
    }

    /// Credits the admission gate after a value has been handed to the
    /// consumer. No-op on unbounded queues.
    pub(super) fn release_slot(&self) {
        if let Some(gate) = &self.gate {
            gate.release_one(self);
        }
    }

    /// Consumer-side shutdown (explicit close or receiver drop).
    pub(super) fn close(&self) {
        match &self.gate {
            Some(gate) => gate.close(self),
            None => self.terminate(),
        }
    }

    pub(super) fn add_sender(&self) {
        self.senders.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn remove_sender(&self) {
        if self.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // last producer gone: an unbounded queue terminates right away,
            // a bounded one lets what was accepted drain first
            match &self.gate {
                Some(gate) => gate.begin_drain(self),
                None => self.terminate(),
            }
        }
    }
}

impl<T> State<T> {
    /// Hands the value to the oldest pending waiter, or buffers it,
    /// preserving the mode exclusivity invariant.
    pub(super) fn push_value(&mut self, value: T) -> Option<Waker> {
        if self.waiters.is_empty() {
            self.buffer.push_back(value);
            return None;
        }
        self.waiters.settle_front_with(|()| Some(value)).flatten()
    }

    pub(super) fn pop_value(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }
}
