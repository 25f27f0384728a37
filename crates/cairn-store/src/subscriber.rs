//! Write-readiness-driven delivery of sealed identifiers.
//!
//! One drain task per subscriber. The task sends the front of the queue as a
//! raw 20-byte frame whenever the notification socket is writable; a send
//! that would block parks the task on write-readiness with the rest of the
//! queue intact. That is the backpressure mechanism: a subscriber that never
//! reads costs queue memory, never event-loop time.

use std::cell::RefCell;
use std::io::ErrorKind;
use std::rc::Rc;

use cairn_wire::ObjectId;
use tokio::net::UnixStream;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::store::{Store, SubscriberId};

/// Drive one subscriber's queue until its socket goes away.
///
/// The queue must already be registered under `subscriber`; `notify` is
/// poked on every seal. Teardown is explicit: any send failure other than
/// would-block removes the queue and closes the socket.
pub async fn run_drain(
    store: Rc<RefCell<Store>>,
    subscriber: SubscriberId,
    stream: UnixStream,
    notify: Rc<Notify>,
) {
    loop {
        let front = store.borrow().subscriber_front(subscriber);
        let Some((id, sent)) = front else {
            notify.notified().await;
            continue;
        };

        if let Err(e) = stream.writable().await {
            teardown(&store, subscriber, &id, &e);
            return;
        }
        match stream.try_write(&id.as_bytes()[sent..]) {
            Ok(0) => {
                let err = std::io::Error::from(ErrorKind::WriteZero);
                teardown(&store, subscriber, &id, &err);
                return;
            }
            Ok(n) => {
                store.borrow_mut().subscriber_advance(subscriber, n);
                if sent + n == id.as_bytes().len() {
                    debug!(%subscriber, %id, "notification delivered");
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                // Socket buffer is full; writable() above will park us until
                // the subscriber drains it.
                continue;
            }
            Err(e) => {
                teardown(&store, subscriber, &id, &e);
                return;
            }
        }
    }
}

fn teardown(
    store: &Rc<RefCell<Store>>,
    subscriber: SubscriberId,
    pending: &ObjectId,
    err: &std::io::Error,
) {
    let backlog = store.borrow().subscriber_backlog(subscriber);
    info!(
        %subscriber,
        backlog,
        next = %pending,
        "subscriber socket failed ({err}), dropping its queue"
    );
    store.borrow_mut().remove_subscriber(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    use crate::store::Store;
    use cairn_wire::OBJECT_ID_LEN;

    fn shrink_buffers(stream: &UnixStream) {
        let size: libc::c_int = 4096;
        for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
            let rc = unsafe {
                libc::setsockopt(
                    stream.as_raw_fd(),
                    libc::SOL_SOCKET,
                    opt,
                    &size as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            assert_eq!(rc, 0);
        }
    }

    async fn read_id(stream: &UnixStream) -> ObjectId {
        let mut buf = [0u8; OBJECT_ID_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            stream.readable().await.unwrap();
            match stream.try_read(&mut buf[filled..]) {
                Ok(0) => panic!("notification socket closed mid-identifier"),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read failed: {e}"),
            }
        }
        ObjectId::from_bytes(buf)
    }

    fn id_for(i: usize) -> ObjectId {
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
        ObjectId::from_bytes(bytes)
    }

    fn seal_one(store: &Rc<RefCell<Store>>, id: ObjectId) {
        let mut store = store.borrow_mut();
        store.create(id, 1, 0).unwrap();
        store.seal(id).unwrap();
    }

    #[tokio::test]
    async fn delivers_in_seal_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(RefCell::new(Store::new(1 << 16)));
                let (ours, theirs) = UnixStream::pair().unwrap();
                let sid = SubscriberId(theirs.as_raw_fd());
                let notify = store.borrow_mut().subscribe(sid).unwrap();
                tokio::task::spawn_local(run_drain(store.clone(), sid, theirs, notify));

                for i in [1usize, 2, 3] {
                    seal_one(&store, id_for(i));
                }
                for i in [1usize, 2, 3] {
                    assert_eq!(read_id(&ours).await, id_for(i));
                }
            })
            .await;
    }

    #[tokio::test]
    async fn full_socket_parks_the_drain_without_losing_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(RefCell::new(Store::new(1 << 20)));
                let (ours, theirs) = UnixStream::pair().unwrap();
                shrink_buffers(&ours);
                shrink_buffers(&theirs);
                let sid = SubscriberId(theirs.as_raw_fd());
                let notify = store.borrow_mut().subscribe(sid).unwrap();
                tokio::task::spawn_local(run_drain(store.clone(), sid, theirs, notify));

                // Far more than the shrunken socket buffers can hold.
                let total = 2000usize;
                for i in 0..total {
                    seal_one(&store, id_for(i));
                }
                tokio::task::yield_now().await;
                assert!(
                    store.borrow().subscriber_backlog(sid) > 0,
                    "queue should be backed up behind the full socket"
                );

                // Reading the socket lets the drain finish, in order.
                for i in 0..total {
                    assert_eq!(read_id(&ours).await, id_for(i));
                }
                assert_eq!(store.borrow().subscriber_backlog(sid), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn closed_subscriber_is_torn_down() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(RefCell::new(Store::new(1 << 16)));
                let (ours, theirs) = UnixStream::pair().unwrap();
                let sid = SubscriberId(theirs.as_raw_fd());
                let notify = store.borrow_mut().subscribe(sid).unwrap();
                let drain =
                    tokio::task::spawn_local(run_drain(store.clone(), sid, theirs, notify));

                drop(ours);
                seal_one(&store, id_for(9));

                drain.await.unwrap();
                assert_eq!(store.borrow().subscriber_backlog(sid), 0);
                assert!(store.borrow().subscriber_front(sid).is_none());
            })
            .await;
    }
}
