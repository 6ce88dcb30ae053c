//! Multi-Producer Single-Consumer queues with deferred completions
//!
//! An unbounded queue plus a bounded variant whose senders receive
//! backpressure, both built on a mutex-guarded dual-mode core: at any
//! moment the queue holds *either* buffered values *or* pending consumer
//! waiters, never both.
//!
//! ## How It Works
//!
//!```text
//!              send(v)                    recv()
//! ┌──────────┐        ┌────────────────┐        ┌──────────┐
//! │ Producer │ ─────► │ values | waits │ ◄───── │ Consumer │
//! │ (many)   │        │  ▼▼▼   |  ▲▲▲  │        │ (one)    │
//! └──────────┘        └────────────────┘        └──────────┘
//!                      one side at a time
//!```
//!
//! - a `send` with waiters pending settles the **oldest waiter** directly;
//!   otherwise the value is buffered
//! - a `recv` with values buffered claims the **oldest value** immediately;
//!   otherwise it enqueues a waiter
//! - termination is a sticky flag: producers are rejected, pending waiters
//!   settle with `None`, buffered values stay consumable until drained
//!
//! ## Bounded variant
//!
//! [`bounded`] composes the same value queue with an admission gate: the
//! fair-semaphore skeleton whose waiters carry the item being sent. A send
//! is *accepted* when a permit is taken and the value enters the queue; the
//! permit returns when the consumer takes delivery. Accepted-but-unconsumed
//! values therefore never exceed the capacity, and senders are served in
//! strict FIFO order.
//!
//! ## Completion order
//!
//! Futures here are armed at creation, not at first poll: `recv` claims a
//! buffered value or enqueues its waiter inside the call, and a bounded
//! `send` is admitted or queued inside the call. Two futures obtained
//! back-to-back therefore settle in creation order no matter how they are
//! polled. Dropping a future cancels it; a fulfillment that already reached
//! a cancelled future is returned to the queue, never lost.
//!
//! ## Example
//!
//!```
//! use attesa::mpsc;
//!
//! let (tx, rx) = mpsc::unbounded();
//!
//! tx.send(1).unwrap();
//! tx.send(2).unwrap();
//! tx.terminate();
//!
//! assert_eq!(rx.try_recv(), Some(1));
//! assert_eq!(rx.try_recv(), Some(2));
//! assert_eq!(rx.try_recv(), None); // drained
//! assert!(tx.send(3).is_err()); // terminated
//!```

mod error;
mod gate;
mod receiver;
mod sender;
mod shared;

use std::sync::Arc;

pub use error::SendError;
pub use receiver::{Receiver, RecvFuture};
pub use sender::{BoundedSender, Sender, SendFuture, TerminateFuture};

use gate::Gate;
use shared::Shared;

/// Creates an unbounded queue. Sends never wait.
pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Shared::new(None));
    (Sender::new(inner.clone()), Receiver::new(inner))
}

/// Creates a bounded queue: at most `capacity` accepted values await
/// consumption at any instant; further senders queue fairly.
///
/// # Panics
///
/// If `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (BoundedSender<T>, Receiver<T>) {
    assert!(capacity > 0, "capacity must be positive");
    let inner = Arc::new(Shared::new(Some(Gate::new(capacity))));
    (BoundedSender::new(inner.clone()), Receiver::new(inner))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::FutureExt;
    use proptest::prelude::*;

    use super::*;

    /// Values flow producer to consumer in FIFO order
    #[test]
    fn test_unbounded_fifo() {
        let (tx, rx) = unbounded();
        for i in 0..3 {
            tx.send(i).unwrap();
        }
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.try_recv(), Some(0));
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
        assert!(rx.is_empty());
    }

    /// Receives created before any send settle in creation order
    #[test]
    fn test_pending_receives_settle_in_order() {
        let (tx, rx) = unbounded();

        let mut first = rx.recv();
        let mut second = rx.recv();
        assert!((&mut first).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_none());

        tx.send('x').unwrap();
        tx.send('y').unwrap();

        // settlement happened at send time; poll order does not matter
        assert_eq!((&mut second).now_or_never(), Some(Some('y')));
        assert_eq!((&mut first).now_or_never(), Some(Some('x')));
    }

    /// Buffered values survive termination; the sentinel comes after drain
    #[test]
    fn test_terminate_after_buffering() {
        let (tx, rx) = unbounded();
        tx.send("a").unwrap();
        tx.send("b").unwrap();
        tx.terminate();

        assert_eq!(tx.send("c"), Err(SendError("c")));

        assert_eq!(rx.recv().now_or_never(), Some(Some("a")));
        assert_eq!(rx.recv().now_or_never(), Some(Some("b")));
        assert_eq!(rx.recv().now_or_never(), Some(None));
    }

    /// Termination is idempotent and settles pending receives right away
    #[test]
    fn test_terminate_settles_pending_receives() {
        let (tx, rx) = unbounded::<u8>();
        let mut pending = rx.recv();
        assert!((&mut pending).now_or_never().is_none());

        tx.terminate();
        tx.terminate();
        assert_eq!((&mut pending).now_or_never(), Some(None));
        assert_eq!(rx.recv().now_or_never(), Some(None));
    }

    /// Dropping a pending receive cancels its waiter
    #[test]
    fn test_cancelled_receive_skipped() {
        let (tx, rx) = unbounded();

        let cancelled = rx.recv();
        let mut survivor = rx.recv();
        drop(cancelled);

        tx.send(7).unwrap();
        assert_eq!((&mut survivor).now_or_never(), Some(Some(7)));
    }

    /// A value delivered to a dropped receive returns to the oldest position
    #[test]
    fn test_delivered_value_requeued_on_cancel() {
        // no other waiter: the value goes back to the buffer front
        let (tx, rx) = unbounded();
        let claimed = rx.recv();
        tx.send(1).unwrap();
        drop(claimed);
        assert_eq!(rx.try_recv(), Some(1));

        // another waiter pending: the value moves to it
        let (tx, rx) = unbounded();
        let first = rx.recv();
        let mut second = rx.recv();
        tx.send(2).unwrap();
        drop(first);
        assert_eq!((&mut second).now_or_never(), Some(Some(2)));
    }

    /// Dropping the last sender terminates the queue after drain
    #[test]
    fn test_sender_drop_terminates() {
        let (tx, rx) = unbounded();
        let tx2 = tx.clone();
        tx.send(5).unwrap();
        drop(tx);

        // a clone is still alive: nothing terminates yet
        assert!(!rx.is_terminated());
        drop(tx2);
        assert!(rx.is_terminated());

        assert_eq!(rx.recv().now_or_never(), Some(Some(5)));
        assert_eq!(rx.recv().now_or_never(), Some(None));
    }

    /// Dropping the receiver rejects producers
    #[test]
    fn test_receiver_drop_rejects_sends() {
        let (tx, rx) = unbounded();
        drop(rx);
        assert_eq!(tx.send(9), Err(SendError(9)));
        assert!(tx.is_terminated());
    }

    /// Backpressure: sends beyond the capacity wait for consumer progress
    #[test]
    fn test_bounded_backpressure() {
        let (tx, rx) = bounded::<usize>(5);
        assert_eq!(tx.capacity(), 5);
        assert_eq!(rx.capacity(), Some(5));

        let mut sends: Vec<_> = (0..10).map(|i| tx.send(i)).collect();

        // first five accepted immediately
        for send in &mut sends[..5] {
            assert_eq!(send.now_or_never(), Some(Ok(())));
        }
        // the rest queue
        for send in &mut sends[5..] {
            assert!(send.now_or_never().is_none());
        }
        assert_eq!(rx.len(), 5);

        // one consumed, the oldest queued send gets through
        assert_eq!(rx.recv().now_or_never(), Some(Some(0)));
        assert_eq!((&mut sends[5]).now_or_never(), Some(Ok(())));

        for expected in 1..5 {
            assert_eq!(rx.recv().now_or_never(), Some(Some(expected)));
        }
        for send in &mut sends[6..] {
            assert_eq!(send.now_or_never(), Some(Ok(())));
        }
        for expected in 5..10 {
            assert_eq!(rx.recv().now_or_never(), Some(Some(expected)));
        }
    }

    /// Termination lets queued sends finish, rejects new ones, and settles
    /// once everything accepted has been consumed
    #[test]
    fn test_bounded_terminate_drains_in_flight() {
        let (tx, rx) = bounded::<usize>(5);
        let mut sends: Vec<_> = (0..10).map(|i| tx.send(i)).collect();

        let mut done = tx.terminate();
        assert!((&mut done).now_or_never().is_none());

        // a send started after termination fails immediately
        assert_eq!(tx.send(99).now_or_never(), Some(Err(SendError(99))));
        assert!(tx.is_terminated());

        // every value accepted or queued before termination arrives
        for expected in 0..10 {
            assert_eq!(rx.recv().now_or_never(), Some(Some(expected)));
        }
        for send in &mut sends {
            assert_eq!(send.now_or_never(), Some(Ok(())));
        }

        assert_eq!(rx.recv().now_or_never(), Some(None));
        assert_eq!((&mut done).now_or_never(), Some(()));

        // terminate is idempotent: a second observer sees the same drain
        assert_eq!(tx.terminate().now_or_never(), Some(()));
    }

    #[derive(Debug, Clone)]
    struct DropCounter(Arc<AtomicUsize>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A queued send withdrawn by cancellation drops its value exactly once
    #[test]
    fn test_cancelled_send_drops_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = DropCounter(drops.clone());

        let (tx, rx) = bounded(1);
        let accepted = tx.send(counter.clone());
        let queued = tx.send(counter);

        drop(queued);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // the accepted value is untouched and still flows through
        drop(accepted);
        assert!(rx.recv().now_or_never().expect("buffered").is_some());
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    // Make sure that, when the queue is dropped, unconsumed values are dropped as well (no memory leak)
    #[test]
    fn test_drop_unread_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = DropCounter(drops.clone());

        {
            let (tx, rx) = unbounded();
            tx.send(counter.clone()).unwrap();
            tx.send(counter).unwrap();
            drop(rx);
            drop(tx);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    /// Closing the receiver hands queued sends their values back
    #[test]
    fn test_receiver_close_fails_queued_sends() {
        let (tx, rx) = bounded::<u32>(1);
        let mut accepted = tx.send(1);
        let mut queued = tx.send(2);

        rx.close();

        assert_eq!((&mut accepted).now_or_never(), Some(Ok(())));
        assert_eq!((&mut queued).now_or_never(), Some(Err(SendError(2))));

        // the accepted value is still consumable after close
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.recv().now_or_never(), Some(None));

        // the drain is over: a termination future settles immediately
        assert_eq!(tx.terminate().now_or_never(), Some(()));
    }

    /// At most `capacity` accepted-but-unconsumed values at any instant
    #[test]
    fn test_bounded_capacity_invariant() {
        let (tx, rx) = bounded::<usize>(2);
        let _pending: Vec<_> = (0..6).map(|i| tx.send(i)).collect();
        assert_eq!(rx.len(), 2);

        assert_eq!(rx.recv().now_or_never(), Some(Some(0)));
        assert_eq!(rx.len(), 2);

        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.len(), 2);
    }

    /// FIFO per producer survives concurrent senders
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_producers_keep_order() {
        const MSGS: usize = 200;
        let producers = num_cpus::get().clamp(2, 4);

        let (tx, rx) = unbounded::<(usize, usize)>();
        let mut handles = Vec::new();
        for p in 0..producers {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                for s in 0..MSGS {
                    tx.send((p, s)).unwrap();
                    if s % 32 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        drop(tx);

        let mut last = vec![None; producers];
        let mut total = 0;
        while let Some((p, s)) = rx.recv().await {
            assert!(last[p].is_none_or(|prev| prev < s));
            last[p] = Some(s);
            total += 1;
        }
        assert_eq!(total, producers * MSGS);

        for h in handles {
            h.await.unwrap();
        }
    }

    /// Bounded queue under load: everything arrives, capacity is honored
    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_under_load() {
        const CAP: usize = 4;
        const MSGS: usize = 100;
        const PRODUCERS: usize = 3;

        let (tx, rx) = bounded::<usize>(CAP);
        let mut handles = Vec::new();
        for _ in 0..PRODUCERS {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..MSGS {
                    tx.send(i).await.unwrap();
                }
            }));
        }
        drop(tx);

        let mut total = 0;
        loop {
            assert!(rx.len() <= CAP);
            match rx.recv().await {
                Some(_) => total += 1,
                None => break,
            }
        }
        assert_eq!(total, PRODUCERS * MSGS);

        for h in handles {
            h.await.unwrap();
        }
    }

    /// The receiver is a `Stream`; combinators drive it to completion
    #[cfg(feature = "stream")]
    #[tokio::test]
    async fn test_stream_collects_until_terminated() {
        use futures::StreamExt;

        let (tx, rx) = unbounded();
        tokio::spawn(async move {
            for i in 0..10 {
                tx.send(i).unwrap();
                tokio::task::yield_now().await;
            }
            tx.terminate();
        });

        let got: Vec<i32> = rx.collect().await;
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    proptest! {
        /// Random send/receive interleavings deliver every value exactly
        /// once, in order
        #[test]
        fn interleaved_send_recv_is_fifo(ops in proptest::collection::vec(any::<bool>(), 1..128)) {
            let (tx, rx) = unbounded::<usize>();
            let mut next = 0usize;
            let mut expected = std::collections::VecDeque::new();

            for send in ops {
                if send {
                    tx.send(next).unwrap();
                    expected.push_back(next);
                    next += 1;
                } else {
                    let mut recv = rx.recv();
                    match (&mut recv).now_or_never() {
                        Some(Some(v)) => prop_assert_eq!(Some(v), expected.pop_front()),
                        Some(None) => prop_assert!(false, "queue was never terminated"),
                        // nothing buffered: dropping the future cancels the waiter
                        None => prop_assert!(expected.is_empty()),
                    }
                }
            }

            while let Some(v) = rx.try_recv() {
                prop_assert_eq!(Some(v), expected.pop_front());
            }
            prop_assert!(expected.is_empty());
        }
    }
}
