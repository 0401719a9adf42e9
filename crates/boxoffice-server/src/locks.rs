//! Keyed mutual exclusion.
//!
//! Requests run concurrently, so the read-modify-write sequences on an event
//! (reserved count, expiry marker, owner close) and on an account
//! (credentials, session) need a lock each. Locks are synchronous and are
//! never held across an `.await`.
//!
//! Lock order: account before event. No code path takes an account lock
//! while holding an event lock, and none holds two event locks at once.

#![allow(clippy::disallowed_types, reason = "Synchronous critical sections only")]

use std::sync::{Mutex, MutexGuard, PoisonError};

use boxoffice_proto::{AccountId, EventId};

/// One mutex per event id.
#[derive(Debug)]
pub struct EventLocks {
    slots: Vec<Mutex<()>>,
}

impl Default for EventLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLocks {
    /// Creates a lock for every id in `1..=999`.
    pub fn new() -> Self {
        let slots = (EventId::FIRST.get()..=EventId::LAST.get()).map(|_| Mutex::new(())).collect();
        Self { slots }
    }

    /// Blocks until `eid` is free.
    pub fn lock(&self, eid: EventId) -> MutexGuard<'_, ()> {
        let index = usize::from(eid.get() - EventId::FIRST.get());
        self.slots[index].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Striped account locks.
///
/// Accounts share stripes, so two accounts may contend, but one account
/// always maps to the same stripe.
#[derive(Debug)]
pub struct AccountLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for AccountLocks {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STRIPES)
    }
}

impl AccountLocks {
    /// Stripe count used by [`Default`].
    pub const DEFAULT_STRIPES: usize = 64;

    /// Creates `stripes` locks (at least one).
    pub fn new(stripes: usize) -> Self {
        Self { stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect() }
    }

    /// Blocks until the stripe of `uid` is free.
    pub fn lock(&self, uid: &AccountId) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(uid)].lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stripe(&self, uid: &AccountId) -> usize {
        let value = uid
            .as_str()
            .bytes()
            .fold(0usize, |acc, digit| acc * 10 + usize::from(digit.wrapping_sub(b'0')));
        value % self.stripes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    #[test]
    fn every_event_id_has_a_lock() {
        let locks = EventLocks::new();
        let _first = locks.lock(EventId::FIRST);
        let _last = locks.lock(EventId::LAST);
    }

    #[test]
    fn same_account_same_stripe() {
        let locks = AccountLocks::new(8);
        let a = AccountId::parse("000009").unwrap();
        let b = AccountId::parse("000017").unwrap();
        assert_eq!(locks.stripe(&a), locks.stripe(&a));
        assert_eq!(locks.stripe(&a), 1);
        assert_eq!(locks.stripe(&b), 1);
    }

    #[test]
    fn event_lock_serializes_increments() {
        let locks = Arc::new(EventLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let eid = EventId::new(7).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = locks.lock(eid);
                        // Non-atomic read-modify-write, safe only under the lock.
                        let seen = counter.load(Ordering::Relaxed);
                        thread::yield_now();
                        counter.store(seen + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 800);
    }
}
