use std::collections::{BTreeMap, BTreeSet};

/// What a server reply for a serial turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<E> {
    /// The request was still pending; it has now been removed.
    Pending(E),
    /// The request was already resolved locally; the reply is spent.
    Orphan,
    /// Never issued, or already answered by the server.
    Unknown,
}

/// Pending asynchronous requests of one connection, keyed by serial.
///
/// Serials start at 1 and are never reused. Removing an entry is the only
/// way to resolve it, so each request resolves at most once.
pub struct RequestTracker<E> {
    next_serial: u64,
    pending: BTreeMap<u64, E>,
    orphans: BTreeSet<u64>,
}

impl<E> RequestTracker<E> {
    pub fn new() -> Self {
        Self {
            next_serial: 1,
            pending: BTreeMap::new(),
            orphans: BTreeSet::new(),
        }
    }

    /// Store a request under a fresh serial.
    pub fn track(&mut self, entry: E) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.pending.insert(serial, entry);
        serial
    }

    /// Withdraw a request whose command never reached the wire. No reply
    /// is expected, so no orphan is kept for it either.
    pub fn cancel(&mut self, serial: u64) -> Option<E> {
        self.orphans.remove(&serial);
        self.pending.remove(&serial)
    }

    /// Classify and consume a server reply.
    pub fn resolve_reply(&mut self, serial: u64) -> Resolution<E> {
        if let Some(entry) = self.pending.remove(&serial) {
            Resolution::Pending(entry)
        } else if self.orphans.remove(&serial) {
            Resolution::Orphan
        } else {
            Resolution::Unknown
        }
    }

    /// Resolve locally every entry matching `pred`, in serial order.
    /// `expect_reply` records them as orphans so the server's eventual reply
    /// is tolerated.
    pub fn take_where(
        &mut self,
        expect_reply: bool,
        mut pred: impl FnMut(&E) -> bool,
    ) -> Vec<(u64, E)> {
        let serials: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(serial, _)| *serial)
            .collect();
        let mut taken = Vec::with_capacity(serials.len());
        for serial in serials {
            if let Some(entry) = self.pending.remove(&serial) {
                if expect_reply {
                    self.orphans.insert(serial);
                }
                taken.push((serial, entry));
            }
        }
        taken
    }

    /// Remove everything, in serial order. Orphans are forgotten too.
    pub fn drain(&mut self) -> Vec<(u64, E)> {
        self.orphans.clear();
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    pub fn get(&self, serial: u64) -> Option<&E> {
        self.pending.get(&serial)
    }

    pub fn contains(&self, serial: u64) -> bool {
        self.pending.contains_key(&serial)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}

impl<E> Default for RequestTracker<E> {
    fn default() -> Self {
        Self::new()
    }
}
