use std::{
    cell::Cell,
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{
    mpsc::shared::Shared,
    waitlist::{Key, Removed},
};

/// Consumer half of a queue (unbounded or bounded).
///
/// Not cloneable: the queue is single-consumer. Methods take `&self` so
/// several [`recv`](Self::recv) futures can be pending at once; they settle
/// in creation order.
pub struct Receiver<T> {
    inner: Arc<Shared<T>>,
    /// Waiter key owned by the `Stream` impl between `poll_next` calls.
    #[cfg(feature = "stream")]
    stream_key: Option<Key>,
    _not_clone: PhantomData<Cell<()>>, //marker type to avoid cloning implementations
}

impl<T> Receiver<T> {
    pub(super) fn new(inner: Arc<Shared<T>>) -> Self {
        Self {
            inner,
            #[cfg(feature = "stream")]
            stream_key: None,
            _not_clone: PhantomData,
        }
    }

    /// Waits for the next value.
    ///
    /// Settles to `Some(value)`, or to `None` once the queue is terminated
    /// and drained. The receive is armed inside this call: a value that is
    /// already buffered is claimed now, otherwise a consumer waiter is
    /// enqueued before the future is returned, so futures obtained
    /// back-to-back settle in creation order.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future returns an already-delivered value to the front
    /// of the queue; no value is lost.
    pub fn recv(&self) -> RecvFuture<'_, T> {
        let stage = {
            let mut state = self.inner.state.lock();
            if let Some(value) = state.pop_value() {
                RecvStage::Ready(Some(value))
            } else if state.terminated {
                RecvStage::Ready(None)
            } else {
                RecvStage::Queued(state.waiters.push_back(()))
            }
        };
        RecvFuture {
            receiver: self,
            stage,
        }
    }

    /// Takes a value if one is buffered right now.
    ///
    /// Cannot distinguish a momentarily empty queue from a terminated and
    /// drained one; use [`recv`](Self::recv) to observe termination.
    pub fn try_recv(&self) -> Option<T> {
        let value = self.inner.state.lock().pop_value();
        if value.is_some() {
            self.inner.release_slot();
        }
        value
    }

    /// Terminates the queue from the consumer side: producers observe
    /// `Err`, and queued bounded sends settle immediately with their values
    /// handed back. Values already accepted remain consumable.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Number of values buffered and ready to be received.
    pub fn len(&self) -> usize {
        self.inner.buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Capacity of the admission gate, `None` on unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.gate.as_ref().map(|gate| gate.capacity())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        #[cfg(feature = "stream")]
        if let Some(key) = self.stream_key.take() {
            let removed = { self.inner.state.lock().waiters.remove(key) };
            // a value settled into the stream waiter dies with the receiver
            drop(removed);
        }
        self.inner.close();
    }
}

// Safe: all queue state sits behind the shared mutex; the marker field only
// blocks `Clone`
unsafe impl<T: Send> Send for Receiver<T> {}
unsafe impl<T: Send> Sync for Receiver<T> {}

enum RecvStage<T> {
    /// Claimed at creation, not yet observed by poll.
    Ready(Option<T>),
    Queued(Key),
    Done,
}

/// Future returned by [`Receiver::recv`].
#[must_use = "the receive is armed on creation; drop the future to cancel it"]
pub struct RecvFuture<'a, T> {
    receiver: &'a Receiver<T>,
    stage: RecvStage<T>,
}

/// Safe: the struct is not self-referential:
/// future fields are not pointing to other fields within the same struct
impl<T> Unpin for RecvFuture<'_, T> {}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.stage {
            RecvStage::Ready(_) => {
                let RecvStage::Ready(value) = std::mem::replace(&mut self.stage, RecvStage::Done)
                else {
                    unreachable!()
                };
                if value.is_some() {
                    // the value is now with the consumer: free its slot
                    self.receiver.inner.release_slot();
                }
                Poll::Ready(value)
            }
            RecvStage::Queued(key) => {
                let outcome = {
                    let mut state = self.receiver.inner.state.lock();
                    match state.waiters.claim(key) {
                        Some(outcome) => Some(outcome),
                        None => {
                            state.waiters.update_waker(key, cx.waker());
                            None
                        }
                    }
                };
                match outcome {
                    Some(value) => {
                        self.stage = RecvStage::Done;
                        if value.is_some() {
                            self.receiver.inner.release_slot();
                        }
                        Poll::Ready(value)
                    }
                    None => Poll::Pending,
                }
            }
            RecvStage::Done => panic!("RecvFuture polled after completion"),
        }
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.stage, RecvStage::Done) {
            RecvStage::Ready(Some(value)) => self.receiver.inner.requeue_value(value),
            RecvStage::Ready(None) | RecvStage::Done => {}
            RecvStage::Queued(key) => {
                let removed = { self.receiver.inner.state.lock().waiters.remove(key) };
                match removed {
                    Removed::Queued(()) | Removed::Settled(None) => {}
                    // lost the race against a producer: hand the value back
                    Removed::Settled(Some(value)) => self.receiver.inner.requeue_value(value),
                }
            }
        }
    }
}

#[cfg(feature = "stream")]
mod stream {
    use futures::Stream;

    use super::*;

    impl<T> Stream for Receiver<T> {
        type Item = T;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
            let this = self.get_mut();
            let mut state = this.inner.state.lock();

            let key = match this.stream_key {
                Some(key) => key,
                None => {
                    if let Some(value) = state.pop_value() {
                        drop(state);
                        this.inner.release_slot();
                        return Poll::Ready(Some(value));
                    }
                    if state.terminated {
                        return Poll::Ready(None);
                    }
                    let key = state.waiters.push_back(());
                    this.stream_key = Some(key);
                    key
                }
            };

            match state.waiters.claim(key) {
                Some(value) => {
                    this.stream_key = None;
                    drop(state);
                    if value.is_some() {
                        this.inner.release_slot();
                    }
                    Poll::Ready(value)
                }
                None => {
                    state.waiters.update_waker(key, cx.waker());
                    Poll::Pending
                }
            }
        }
    }
}
