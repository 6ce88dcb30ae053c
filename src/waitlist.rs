use std::task::Waker;

/// Index of a waiter inside the arena.
///
/// A key stays valid from [`WaitList::push_back`] until its owner frees the
/// slot through [`WaitList::claim`] or [`WaitList::remove`].
pub(crate) type Key = usize;

/// What the owner got back when it removed its waiter.
pub(crate) enum Removed<P, S> {
    /// The waiter was still queued; its payload is handed back untouched.
    Queued(P),
    /// A fulfiller settled the waiter first; the owner reclaims the outcome
    /// so it can return the fulfillment to wherever it came from.
    Settled(S),
}

/// FIFO of pending waiters backed by a slab arena.
///
/// Nodes are doubly linked through `usize` indices rather than pointers, so
/// interior removal is O(1) and there is nothing to alias. A node moves
/// through three stages:
///
/// ```text
/// push_back ──► Queued ──settle_front_with──► Settled ──claim──► freed
///                 │                                     (owner)
///                 └───────────────remove───────────────────────► freed
/// ```
///
/// Fulfillers only ever touch the queue head; the *owner* of a key (the
/// future that obtained it) is the only party that frees the slot. That
/// split keeps keys stable for the owner's whole lifetime without
/// generation counters.
///
/// `P` is the payload a waiter carries while queued (a permit count, the
/// item of an in-flight send), `S` the outcome stored for the owner once
/// the waiter is settled.
///
/// The list itself is not synchronized: every instance lives behind the
/// mutex of the primitive that owns it, and wakers handed out by the
/// settling methods must be invoked only after that mutex is released.
pub(crate) struct WaitList<P, S> {
    slots: Vec<Slot<P, S>>,
    head: Option<Key>,
    tail: Option<Key>,
    next_free: Option<Key>,
    /// Number of nodes currently in the `Queued` stage.
    queued: usize,
}

enum Slot<P, S> {
    Vacant { next_free: Option<Key> },
    Occupied(Node<P, S>),
}

struct Node<P, S> {
    prev: Option<Key>,
    next: Option<Key>,
    state: NodeState<P, S>,
}

enum NodeState<P, S> {
    Queued { payload: P, waker: Option<Waker> },
    Settled(S),
}

impl<P, S> WaitList<P, S> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
            next_free: None,
            queued: 0,
        }
    }

    /// Number of queued (unsettled) waiters.
    pub(crate) fn len(&self) -> usize {
        self.queued
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Links a new waiter at the tail, returning its key.
    pub(crate) fn push_back(&mut self, payload: P) -> Key {
        let node = Node {
            prev: self.tail,
            next: None,
            state: NodeState::Queued {
                payload,
                waker: None,
            },
        };

        let key = match self.next_free {
            Some(key) => {
                let slot = std::mem::replace(&mut self.slots[key], Slot::Occupied(node));
                let Slot::Vacant { next_free } = slot else {
                    unreachable!("free list points at an occupied slot")
                };
                self.next_free = next_free;
                key
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(prev) => self.node_mut(prev).next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.queued += 1;

        key
    }

    /// Payload of the oldest queued waiter, if any.
    pub(crate) fn front(&self) -> Option<&P> {
        let key = self.head?;
        match &self.slots[key] {
            Slot::Occupied(Node {
                state: NodeState::Queued { payload, .. },
                ..
            }) => Some(payload),
            _ => unreachable!("head is not a queued node"),
        }
    }

    /// Unlinks the head waiter and settles it.
    ///
    /// The closure consumes the payload and produces the outcome stored for
    /// the owner; side effects (forwarding an item, deducting permits)
    /// happen inside it, still under the caller's lock.
    ///
    /// Returns `None` if nothing is queued, otherwise the waker to invoke
    /// once the caller has released its lock.
    pub(crate) fn settle_front_with<F>(&mut self, f: F) -> Option<Option<Waker>>
    where
        F: FnOnce(P) -> S,
    {
        let key = self.head?;
        self.unlink(key);

        let slot = std::mem::replace(&mut self.slots[key], Slot::Vacant { next_free: None });
        let Slot::Occupied(Node {
            state: NodeState::Queued { payload, waker },
            ..
        }) = slot
        else {
            unreachable!("head is not a queued node")
        };

        let outcome = f(payload);
        self.slots[key] = Slot::Occupied(Node {
            prev: None,
            next: None,
            state: NodeState::Settled(outcome),
        });

        Some(waker)
    }

    /// Settles every queued waiter in FIFO order, pushing their wakers into
    /// `woken` for the caller to invoke after unlocking.
    pub(crate) fn settle_all_with<F>(&mut self, mut f: F, woken: &mut Vec<Waker>)
    where
        F: FnMut(P) -> S,
    {
        while let Some(waker) = self.settle_front_with(&mut f) {
            if let Some(w) = waker {
                woken.push(w);
            }
        }
    }

    /// Re-registers the waker of a still-queued waiter.
    pub(crate) fn update_waker(&mut self, key: Key, waker: &Waker) {
        if let Slot::Occupied(Node {
            state: NodeState::Queued { waker: slot, .. },
            ..
        }) = &mut self.slots[key]
        {
            match slot {
                Some(current) if current.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
        }
    }

    /// Owner-side observation: if the waiter was settled, frees the slot
    /// and returns the outcome. Returns `None` while still queued.
    pub(crate) fn claim(&mut self, key: Key) -> Option<S> {
        match &self.slots[key] {
            Slot::Occupied(Node {
                state: NodeState::Queued { .. },
                ..
            }) => return None,
            Slot::Occupied(Node {
                state: NodeState::Settled(_),
                ..
            }) => {}
            Slot::Vacant { .. } => unreachable!("claim on a freed key"),
        }

        let slot = self.free(key);
        match slot {
            Slot::Occupied(Node {
                state: NodeState::Settled(outcome),
                ..
            }) => Some(outcome),
            _ => unreachable!(),
        }
    }

    /// Owner-side cancellation and teardown.
    ///
    /// A queued waiter is unlinked and its payload handed back. A settled
    /// one yields its outcome: the settle raced ahead of the cancel, and
    /// the caller decides what to do with the fulfillment.
    pub(crate) fn remove(&mut self, key: Key) -> Removed<P, S> {
        let queued = matches!(
            &self.slots[key],
            Slot::Occupied(Node {
                state: NodeState::Queued { .. },
                ..
            })
        );
        if queued {
            self.unlink(key);
        }

        match self.free(key) {
            Slot::Occupied(Node {
                state: NodeState::Queued { payload, .. },
                ..
            }) => Removed::Queued(payload),
            Slot::Occupied(Node {
                state: NodeState::Settled(outcome),
                ..
            }) => Removed::Settled(outcome),
            Slot::Vacant { .. } => unreachable!("remove on a freed key"),
        }
    }

    /// Detaches a queued node from the FIFO linkage.
    fn unlink(&mut self, key: Key) {
        let node = self.node_mut(key);
        let prev = node.prev.take();
        let next = node.next.take();

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.queued -= 1;
    }

    /// Vacates a slot and chains it into the free list.
    fn free(&mut self, key: Key) -> Slot<P, S> {
        let slot = std::mem::replace(
            &mut self.slots[key],
            Slot::Vacant {
                next_free: self.next_free,
            },
        );
        self.next_free = Some(key);
        slot
    }

    fn node_mut(&mut self, key: Key) -> &mut Node<P, S> {
        match &mut self.slots[key] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("linked key {key} is vacant"),
        }
    }
}
