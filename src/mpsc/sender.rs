use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{
    mpsc::{
        error::SendError,
        gate::{Admission, Gate},
        shared::Shared,
    },
    waitlist::Key,
};

/// Producer half of an unbounded queue. Cloneable; the queue terminates
/// when the last clone drops.
pub struct Sender<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    pub(super) fn new(inner: Arc<Shared<T>>) -> Self {
        Self { inner }
    }

    /// Delivers a value to the oldest pending receive, or buffers it.
    ///
    /// Never waits. `Err` hands the value back iff the queue is already
    /// terminated.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.inner.is_terminated() {
            return Err(SendError(value));
        }
        self.inner.send_value(value)
    }

    /// Terminates the queue: later sends fail, pending receives settle with
    /// the end-of-stream sentinel right away, and values already buffered
    /// remain consumable. Sticky and idempotent.
    pub fn terminate(&self) {
        self.inner.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.add_sender();
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.inner.remove_sender();
    }
}

/// Producer half of a bounded queue. Cloneable; sends apply backpressure
/// once `capacity` accepted values are awaiting consumption.
pub struct BoundedSender<T> {
    inner: Arc<Shared<T>>,
}

impl<T> BoundedSender<T> {
    pub(super) fn new(inner: Arc<Shared<T>>) -> Self {
        Self { inner }
    }

    fn gate(&self) -> &Gate<T> {
        match &self.inner.gate {
            Some(gate) => gate,
            // constructors always pair this handle with a gated queue
            None => unreachable!("bounded sender without a gate"),
        }
    }

    /// Sends a value, waiting for capacity.
    ///
    /// The admission is armed inside this call: with free capacity and no
    /// older sender queued the value enters the queue immediately;
    /// otherwise the sender queues, carrying its value, and whoever frees
    /// capacity forwards the value on; the future need not be polled for
    /// that to happen. Settles to `Ok(())` once the value is in the queue,
    /// or to `Err` (value handed back) iff the queue was already terminated
    /// when the send started.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future before admission withdraws the value; after
    /// admission the value is in the queue and stays there.
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        let stage = match self.gate().admit(&self.inner, value) {
            Admission::Accepted => SendStage::Ready(Ok(())),
            Admission::Rejected(value) => SendStage::Ready(Err(SendError(value))),
            Admission::Queued(key) => SendStage::Queued(key),
        };
        SendFuture {
            sender: self,
            stage,
        }
    }

    /// Begins graceful termination.
    ///
    /// Sends that start after this call settle `Err` immediately; sends
    /// already queued stay in line and complete. The returned future
    /// settles once every accepted value has been taken by the consumer,
    /// directly before the consumer observes its final `None`. Idempotent:
    /// every call observes the same drain. The drain proceeds whether or
    /// not the future is polled.
    pub fn terminate(&self) -> TerminateFuture<'_, T> {
        let stage = match self.gate().begin_drain_observed(&self.inner) {
            Some(key) => DrainStage::Queued(key),
            None => DrainStage::Ready,
        };
        TerminateFuture {
            sender: self,
            stage,
        }
    }

    pub fn capacity(&self) -> usize {
        self.gate().capacity()
    }

    pub fn is_terminated(&self) -> bool {
        self.gate().is_closed()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        self.inner.add_sender();
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for BoundedSender<T> {
    fn drop(&mut self) {
        self.inner.remove_sender();
    }
}

enum SendStage<T> {
    Ready(Result<(), SendError<T>>),
    Queued(Key),
    Done,
}

/// Future returned by [`BoundedSender::send`].
#[must_use = "the send is admitted or queued on creation; drop the future to withdraw it"]
pub struct SendFuture<'a, T> {
    sender: &'a BoundedSender<T>,
    stage: SendStage<T>,
}

/// Safe: the struct is not self-referential:
/// future fields are not pointing to other fields within the same struct
impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.stage {
            SendStage::Ready(_) => {
                let SendStage::Ready(outcome) =
                    std::mem::replace(&mut self.stage, SendStage::Done)
                else {
                    unreachable!()
                };
                Poll::Ready(outcome)
            }
            SendStage::Queued(key) => match self.sender.gate().poll_send(key, cx.waker()) {
                Some(outcome) => {
                    self.stage = SendStage::Done;
                    Poll::Ready(outcome)
                }
                None => Poll::Pending,
            },
            SendStage::Done => panic!("SendFuture polled after completion"),
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let SendStage::Queued(key) = std::mem::replace(&mut self.stage, SendStage::Done) {
            self.sender.gate().cancel_send(&self.sender.inner, key);
        }
    }
}

#[derive(Clone, Copy)]
enum DrainStage {
    Ready,
    Queued(Key),
    Done,
}

/// Future returned by [`BoundedSender::terminate`]; settles once the drain
/// completes.
#[must_use = "termination begins on creation; poll the future to observe the drain"]
pub struct TerminateFuture<'a, T> {
    sender: &'a BoundedSender<T>,
    stage: DrainStage,
}

/// Safe: the struct is not self-referential:
/// future fields are not pointing to other fields within the same struct
impl<T> Unpin for TerminateFuture<'_, T> {}

impl<T> Future for TerminateFuture<'_, T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.stage {
            DrainStage::Ready => {
                self.stage = DrainStage::Done;
                Poll::Ready(())
            }
            DrainStage::Queued(key) => {
                if self.sender.gate().poll_drained(key, cx.waker()) {
                    self.stage = DrainStage::Done;
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
            DrainStage::Done => panic!("TerminateFuture polled after completion"),
        }
    }
}

impl<T> Drop for TerminateFuture<'_, T> {
    fn drop(&mut self) {
        if let DrainStage::Queued(key) = self.stage {
            self.sender.gate().cancel_drain_waiter(key);
        }
    }
}
