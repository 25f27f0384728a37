//! Clients waiting for an identifier to be sealed.
//!
//! A GET for an identifier that is not yet sealed records the requesting
//! client here instead of replying. Sealing takes the whole list, in arrival
//! order, and the dispatcher replies to each entry. A client that repeats
//! the request appears (and is answered) once per appearance.

use std::collections::HashMap;

use cairn_wire::ObjectId;

use crate::store::ClientId;

/// Map from identifier to the ordered clients awaiting its seal.
///
/// An entry exists only while at least one waiter is pending.
#[derive(Default)]
pub struct WaiterTable {
    inner: HashMap<ObjectId, Vec<ClientId>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `client` to the waiters for `id`.
    pub fn add_waiter(&mut self, id: ObjectId, client: ClientId) {
        self.inner.entry(id).or_default().push(client);
    }

    /// Remove and return every waiter for `id`, in arrival order.
    pub fn take_waiters(&mut self, id: &ObjectId) -> Vec<ClientId> {
        self.inner.remove(id).unwrap_or_default()
    }

    /// Drop every waiter entry referencing a disconnected client.
    pub fn remove_client(&mut self, client: ClientId) {
        self.inner.retain(|_, waiters| {
            waiters.retain(|w| *w != client);
            !waiters.is_empty()
        });
    }

    /// True if `id` has at least one pending waiter.
    pub fn has_waiters(&self, id: &ObjectId) -> bool {
        self.inner.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_preserves_arrival_order() {
        let mut waiters = WaiterTable::new();
        let id = ObjectId::repeat(1);
        waiters.add_waiter(id, ClientId(10));
        waiters.add_waiter(id, ClientId(12));
        waiters.add_waiter(id, ClientId(11));
        assert_eq!(
            waiters.take_waiters(&id),
            vec![ClientId(10), ClientId(12), ClientId(11)]
        );
        // Taking consumes the entry.
        assert!(waiters.take_waiters(&id).is_empty());
        assert!(!waiters.has_waiters(&id));
    }

    #[test]
    fn repeated_requests_fan_out_per_appearance() {
        let mut waiters = WaiterTable::new();
        let id = ObjectId::repeat(2);
        waiters.add_waiter(id, ClientId(7));
        waiters.add_waiter(id, ClientId(7));
        assert_eq!(waiters.take_waiters(&id), vec![ClientId(7), ClientId(7)]);
    }

    #[test]
    fn remove_client_reaps_across_identifiers() {
        let mut waiters = WaiterTable::new();
        let a = ObjectId::repeat(3);
        let b = ObjectId::repeat(4);
        waiters.add_waiter(a, ClientId(1));
        waiters.add_waiter(a, ClientId(2));
        waiters.add_waiter(b, ClientId(2));

        waiters.remove_client(ClientId(2));
        assert_eq!(waiters.take_waiters(&a), vec![ClientId(1)]);
        // b's only waiter is gone, so its entry is too.
        assert!(!waiters.has_waiters(&b));
    }
}
