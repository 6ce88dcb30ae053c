//! Asynchronous concurrency primitives
//!
//! Non-blocking coordination structures whose blocking points hand back
//! futures instead of parking a thread:
//!
//! | Primitive | What it gates | Waits on |
//! |-----------|---------------|----------|
//! | [`AsyncSemaphore`] | a permit ledger | [`acquire`](AsyncSemaphore::acquire) |
//! | [`mpsc::unbounded`] | nothing (values buffer) | [`recv`](mpsc::Receiver::recv) |
//! | [`mpsc::bounded`] | capacity (backpressure) | [`send`](mpsc::BoundedSender::send) and [`recv`](mpsc::Receiver::recv) |
//!
//! All three share one waiter-queue core: a strict-FIFO list of pending
//! completions guarded by a short critical section. Whoever settles a
//! completion (a releaser, a sender) does the bookkeeping on its own
//! thread and then wakes the waiting task; no locks are held while user
//! continuations run, and the library never spawns or blocks a thread of
//! its own.
//!
//! Futures returned here are armed at creation: the waiter is enqueued (or
//! the fast path taken) inside the originating call, so completions settle
//! in call order regardless of how the futures are polled, and fairness
//! holds even for futures that are never polled. Dropping a future cancels
//! its waiter; fulfillments that raced into a cancelled waiter are returned
//! to the primitive, never lost.

mod waitlist;

pub mod mpsc;
pub mod semaphore;

pub use semaphore::AsyncSemaphore;
