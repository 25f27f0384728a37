//! The store state: one aggregate owning the arena, the object table, the
//! waiters, the subscriber queues and the connected clients.
//!
//! Every event-loop task receives this aggregate as shared context
//! (`Rc<RefCell<Store>>`) and mutates it between awaits, never across one.
//! That, plus the current-thread runtime, is the whole concurrency story:
//! no locks, no atomics.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use cairn_arena::{Arena, MapArena};
use cairn_wire::{OBJECT_ID_LEN, ObjectId, Reply};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::FatalError;
use crate::object_table::{ObjectEntry, ObjectInfo, ObjectTable};
use crate::waiters::WaiterTable;

/// A connected client, keyed by the raw fd of its accepted socket. The fd's
/// lifetime is bound to the connection's stream; the id is just the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub RawFd);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// A subscriber, keyed by the raw fd of its notification socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub RawFd);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber:{}", self.0)
    }
}

/// A reply on its way out to a client, possibly carrying a passed fd.
#[derive(Debug, Clone, Copy)]
pub struct Outbound {
    pub reply: Reply,
    /// Arena fd to pass via ancillary data. Present iff the command grants
    /// buffer access (CREATE, GET, SEAL fan-out).
    pub fd: Option<RawFd>,
}

/// What a seal produced: the access-granting reply and the waiters owed it.
pub struct SealFanout {
    pub reply: Reply,
    pub waiters: Vec<ClientId>,
}

/// Identifiers sealed but not yet delivered to one subscriber.
///
/// Append-only except for the prefix drain; `sent` tracks how many bytes of
/// the front identifier have already left, so a partial send resumes exactly
/// where it stopped.
struct SubscriberQueue {
    pending: VecDeque<ObjectId>,
    sent: usize,
    notify: Rc<Notify>,
}

pub struct Store {
    arena: MapArena,
    objects: ObjectTable,
    waiters: WaiterTable,
    subscribers: HashMap<SubscriberId, SubscriberQueue>,
    clients: HashMap<ClientId, UnboundedSender<Outbound>>,
}

fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

impl Store {
    /// A store whose arena grows in segments of `segment_size` bytes.
    pub fn new(segment_size: usize) -> Self {
        Self {
            arena: MapArena::new(segment_size),
            objects: ObjectTable::new(),
            waiters: WaiterTable::new(),
            subscribers: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    // ── object lifecycle ─────────────────────────────────────────────────

    /// Allocate a buffer for a new object and record it as open.
    ///
    /// The reply names the allocation's handle triple; the caller sends it
    /// together with the arena fd. Creating an identifier that is already
    /// live is a precondition violation.
    pub fn create(
        &mut self,
        id: ObjectId,
        data_size: i64,
        metadata_size: i64,
    ) -> Result<Reply, FatalError> {
        if self.objects.contains(&id) {
            return Err(FatalError::DuplicateCreate(id));
        }
        let total = match (u64::try_from(data_size), u64::try_from(metadata_size)) {
            (Ok(d), Ok(m)) => d.checked_add(m),
            _ => None,
        };
        let Some(total) = total else {
            return Err(FatalError::InvalidSizes {
                id,
                data_size,
                metadata_size,
            });
        };

        let alloc = self.arena.alloc(total as usize)?;
        let handle = self.arena.describe(alloc);
        let entry = ObjectEntry {
            id,
            info: ObjectInfo {
                data_size,
                metadata_size,
                create_time: unix_now(),
                construct_duration: 0,
            },
            alloc,
            handle,
        };
        let reply = entry.reply();
        self.objects.insert_open(entry);
        debug!(%id, data_size, metadata_size, "created object");
        Ok(reply)
    }

    /// Look up a sealed object for `client`.
    ///
    /// Returns the access reply if the object is sealed. Otherwise the client
    /// is recorded as a waiter and `None` comes back: no reply now, one reply
    /// later when (if) the object is sealed.
    pub fn get(&mut self, client: ClientId, id: ObjectId) -> Option<Reply> {
        match self.objects.find_sealed(&id) {
            Some(entry) => Some(entry.reply()),
            None => {
                debug!(%id, %client, "object not sealed yet, parking waiter");
                self.waiters.add_waiter(id, client);
                None
            }
        }
    }

    /// True iff the object is sealed. Open objects are invisible here.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.find_sealed(id).is_some()
    }

    /// Seal an open object: move it to the sealed map, enqueue its identifier
    /// to every subscriber, and take the waiters owed a reply.
    ///
    /// Sealing an identifier that is not open is a no-op and returns `None`:
    /// nothing is notified and no reply is owed.
    pub fn seal(&mut self, id: ObjectId) -> Option<SealFanout> {
        let Some(entry) = self.objects.seal(&id, unix_now()) else {
            debug!(%id, "seal of an object that is not open, ignoring");
            return None;
        };
        let reply = entry.reply();

        for queue in self.subscribers.values_mut() {
            queue.pending.push_back(id);
            queue.notify.notify_one();
        }

        let waiters = self.waiters.take_waiters(&id);
        debug!(%id, waiters = waiters.len(), "sealed object");
        Some(SealFanout { reply, waiters })
    }

    /// Remove a sealed object and release its buffer. Deleting anything that
    /// is not currently sealed is a precondition violation.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), FatalError> {
        let entry = self
            .objects
            .remove_sealed(&id)
            .ok_or(FatalError::DeleteUnsealed(id))?;
        self.arena.free(entry.alloc);
        debug!(%id, "deleted object");
        Ok(())
    }

    // ── connections ──────────────────────────────────────────────────────

    pub fn register_client(&mut self, client: ClientId, tx: UnboundedSender<Outbound>) {
        self.clients.insert(client, tx);
    }

    /// The outbound channel for a client, if it is still connected.
    pub fn client_tx(&self, client: ClientId) -> Option<UnboundedSender<Outbound>> {
        self.clients.get(&client).cloned()
    }

    /// Tear down a client: drop its outbound channel and reap any waiter
    /// entries still pointing at it, so a later seal does not reply into a
    /// closed socket.
    pub fn disconnect_client(&mut self, client: ClientId) {
        self.clients.remove(&client);
        self.waiters.remove_client(client);
    }

    // ── subscribers ──────────────────────────────────────────────────────

    /// Register a subscriber queue for a new notification socket.
    ///
    /// Past seals are not replayed, so a subscriber must attach before any
    /// object activity; anything else is a precondition violation.
    pub fn subscribe(&mut self, subscriber: SubscriberId) -> Result<Rc<Notify>, FatalError> {
        if !self.objects.is_empty() {
            return Err(FatalError::SubscribeAfterActivity);
        }
        let notify = Rc::new(Notify::new());
        self.subscribers.insert(
            subscriber,
            SubscriberQueue {
                pending: VecDeque::new(),
                sent: 0,
                notify: notify.clone(),
            },
        );
        Ok(notify)
    }

    /// The front of a subscriber's queue: the identifier being delivered and
    /// how many of its bytes already went out. `None` if nothing is pending.
    pub fn subscriber_front(&self, subscriber: SubscriberId) -> Option<(ObjectId, usize)> {
        let queue = self.subscribers.get(&subscriber)?;
        queue.pending.front().map(|id| (*id, queue.sent))
    }

    /// Account `n` more bytes sent for the front identifier, advancing the
    /// queue when the identifier is fully delivered.
    pub fn subscriber_advance(&mut self, subscriber: SubscriberId, n: usize) {
        let Some(queue) = self.subscribers.get_mut(&subscriber) else {
            return;
        };
        queue.sent += n;
        debug_assert!(queue.sent <= OBJECT_ID_LEN);
        if queue.sent == OBJECT_ID_LEN {
            queue.pending.pop_front();
            queue.sent = 0;
        }
    }

    /// Drop a subscriber and whatever it had not consumed.
    pub fn remove_subscriber(&mut self, subscriber: SubscriberId) {
        self.subscribers.remove(&subscriber);
    }

    /// Queued-identifier count for one subscriber.
    pub fn subscriber_backlog(&self, subscriber: SubscriberId) -> usize {
        self.subscribers
            .get(&subscriber)
            .map_or(0, |q| q.pending.len())
    }

    /// `(open, sealed)` object counts.
    pub fn object_counts(&self) -> (usize, usize) {
        self.objects.counts()
    }
}
