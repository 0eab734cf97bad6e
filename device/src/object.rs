//! Object identity for argument handles.
//!
//! Every handle that can be passed to a kernel by identity carries an
//! [`Identity`]: a process-unique [`ObjectId`] plus an epoch. Caches key on
//! the pair ([`IdentityToken`]). Ids are never reused, so an entry keyed on a
//! dropped object can never be hit again; bumping the epoch retires entries for
//! an object that is still alive but whose cached facts no longer hold.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityToken {
    pub id: ObjectId,
    pub epoch: u32,
}

#[derive(Debug)]
pub struct Identity {
    id: ObjectId,
    epoch: AtomicU32,
}

impl Identity {
    pub fn new() -> Self {
        Self { id: ObjectId::next(), epoch: AtomicU32::new(0) }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn token(&self) -> IdentityToken {
        IdentityToken { id: self.id, epoch: self.epoch.load(Ordering::Acquire) }
    }

    /// Retire every cache entry keyed on the current token.
    pub fn bump(&self) -> u32 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}
