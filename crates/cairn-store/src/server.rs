//! The store server: accept loop, per-connection dispatch, reply writers.
//!
//! Everything runs on one thread inside a `LocalSet`. Each accepted client
//! gets a reader task (parses frames, mutates the store) and a writer task
//! (flushes replies, passing the arena fd where the command grants buffer
//! access). Fatal conditions funnel through a channel into [`Server::run`],
//! which returns the error so the binary can log it and exit non-zero.

use std::cell::RefCell;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::rc::Rc;

use cairn_fdpass::{recv_with_fd, send_with_fd};
use cairn_wire::framing::{read_frame, write_full};
use cairn_wire::{MessageType, Request};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::spawn_local;
use tracing::{debug, info, warn};

use crate::error::FatalError;
use crate::store::{ClientId, Outbound, Store, SubscriberId};
use crate::subscriber::run_drain;

/// Arena growth unit. Oversized objects get a segment of their own.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 << 20;

/// What the dispatcher tells the reader loop to do next.
enum Flow {
    Continue,
    Disconnect,
}

pub struct Server {
    listener: UnixListener,
    store: Rc<RefCell<Store>>,
    fatal_tx: mpsc::UnboundedSender<FatalError>,
    fatal_rx: mpsc::UnboundedReceiver<FatalError>,
}

impl Server {
    /// Bind the listening socket and set up empty store state.
    pub fn bind(path: &Path) -> Result<Self, FatalError> {
        let listener = UnixListener::bind(path).map_err(FatalError::Listener)?;
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener,
            store: Rc::new(RefCell::new(Store::new(DEFAULT_SEGMENT_SIZE))),
            fatal_tx,
            fatal_rx,
        })
    }

    /// Serve until a fatal error. Must be polled inside a `LocalSet`;
    /// connection tasks are spawned locally so all store access stays on
    /// this thread.
    pub async fn run(mut self) -> Result<(), FatalError> {
        loop {
            tokio::select! {
                biased;

                Some(fatal) = self.fatal_rx.recv() => return Err(fatal),

                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted.map_err(FatalError::Listener)?;
                    self.accept_client(stream);
                }
            }
        }
    }

    fn accept_client(&self, stream: UnixStream) {
        let stream = Rc::new(stream);
        let client = ClientId(stream.as_raw_fd());
        debug!(%client, "new connection");

        let (tx, rx) = mpsc::unbounded_channel();
        self.store.borrow_mut().register_client(client, tx);
        spawn_local(client_writer(
            self.store.clone(),
            stream.clone(),
            client,
            rx,
            self.fatal_tx.clone(),
        ));
        spawn_local(serve_client(
            self.store.clone(),
            stream,
            client,
            self.fatal_tx.clone(),
        ));
    }
}

/// Read frames from one client until it goes away or the store must die.
async fn serve_client(
    store: Rc<RefCell<Store>>,
    stream: Rc<UnixStream>,
    client: ClientId,
    fatal_tx: mpsc::UnboundedSender<FatalError>,
) {
    loop {
        match read_frame(&stream).await {
            Ok(Some((ty, payload))) => {
                match dispatch(&store, &stream, client, ty, &payload).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Disconnect) => {
                        debug!(%client, "disconnect requested");
                        store.borrow_mut().disconnect_client(client);
                        return;
                    }
                    Err(fatal) => {
                        let _ = fatal_tx.send(fatal);
                        return;
                    }
                }
            }
            Ok(None) => {
                debug!(%client, "connection closed");
                store.borrow_mut().disconnect_client(client);
                return;
            }
            Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {
                debug!(%client, "connection reset");
                store.borrow_mut().disconnect_client(client);
                return;
            }
            Err(e) => {
                let _ = fatal_tx.send(FatalError::CommandIo(e));
                return;
            }
        }
    }
}

/// Decode one request and perform the operation.
async fn dispatch(
    store: &Rc<RefCell<Store>>,
    stream: &Rc<UnixStream>,
    client: ClientId,
    raw_ty: i64,
    payload: &[u8],
) -> Result<Flow, FatalError> {
    let Some(ty) = MessageType::from_i64(raw_ty) else {
        return Err(FatalError::UnhandledMessage(raw_ty));
    };
    let req = Request::from_le_bytes(payload).ok_or(FatalError::MalformedRequest {
        ty: raw_ty,
        len: payload.len(),
    })?;

    match ty {
        MessageType::Create => {
            let reply = store
                .borrow_mut()
                .create(req.id, req.data_size, req.metadata_size)?;
            reply_to(store, client, Outbound {
                reply,
                fd: Some(reply.store_fd_val),
            });
        }
        MessageType::Get => {
            // A miss parks the client as a waiter; the reply comes from a
            // later seal, through the same fd-passing shape. Bind before
            // replying so the store borrow is released first.
            let reply = store.borrow_mut().get(client, req.id);
            if let Some(reply) = reply {
                reply_to(store, client, Outbound {
                    reply,
                    fd: Some(reply.store_fd_val),
                });
            }
        }
        MessageType::Contains => {
            let has_object = store.borrow().contains(&req.id);
            let reply = cairn_wire::Reply {
                has_object: has_object.into(),
                ..Default::default()
            };
            reply_to(store, client, Outbound { reply, fd: None });
        }
        MessageType::Seal => {
            let fanout = store.borrow_mut().seal(req.id);
            if let Some(fanout) = fanout {
                for waiter in fanout.waiters {
                    reply_to(store, waiter, Outbound {
                        reply: fanout.reply,
                        fd: Some(fanout.reply.store_fd_val),
                    });
                }
            }
        }
        MessageType::Delete => {
            store.borrow_mut().delete(req.id)?;
        }
        MessageType::Subscribe => {
            subscribe(store, stream).await?;
        }
        MessageType::Disconnect => return Ok(Flow::Disconnect),
        // Reserved codes; the store never handles them.
        MessageType::Transfer | MessageType::Data => {
            return Err(FatalError::UnhandledMessage(raw_ty));
        }
    }
    Ok(Flow::Continue)
}

/// Queue an outbound reply for a client's writer task.
///
/// A missing client means it disconnected while the reply was owed (a seal
/// racing a teardown); per policy that is skipped, not fatal.
fn reply_to(store: &Rc<RefCell<Store>>, client: ClientId, outbound: Outbound) {
    match store.borrow().client_tx(client) {
        Some(tx) => {
            if tx.send(outbound).is_err() {
                warn!(%client, "client writer already gone, dropping reply");
            }
        }
        None => warn!(%client, "client disconnected before its reply, dropping it"),
    }
}

/// Handle SUBSCRIBE: take the notification fd off the wire and start a drain.
async fn subscribe(
    store: &Rc<RefCell<Store>>,
    stream: &Rc<UnixStream>,
) -> Result<(), FatalError> {
    // The subscriber's notification fd follows the frame as ancillary data
    // with a one-byte payload.
    let mut byte = [0u8; 1];
    let (fd, _n) = recv_with_fd(stream, &mut byte)
        .await
        .map_err(FatalError::CommandIo)?;
    let subscriber = SubscriberId(fd.as_raw_fd());

    let notify = store.borrow_mut().subscribe(subscriber)?;

    let std_stream = std::os::unix::net::UnixStream::from(fd);
    std_stream
        .set_nonblocking(true)
        .map_err(FatalError::CommandIo)?;
    let notif_stream = UnixStream::from_std(std_stream).map_err(FatalError::CommandIo)?;

    info!(%subscriber, "subscriber attached");
    spawn_local(run_drain(store.clone(), subscriber, notif_stream, notify));
    Ok(())
}

/// Flush replies to one client, passing the arena fd where present.
///
/// Command replies are tiny; any failure here other than the peer vanishing
/// is fatal to the server. A vanished peer just tears this client down.
async fn client_writer(
    store: Rc<RefCell<Store>>,
    stream: Rc<UnixStream>,
    client: ClientId,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    fatal_tx: mpsc::UnboundedSender<FatalError>,
) {
    while let Some(outbound) = rx.recv().await {
        let bytes = outbound.reply.to_le_bytes();
        let result = match outbound.fd {
            Some(fd) => send_with_fd(&stream, fd, &bytes).await,
            None => write_full(&stream, &bytes).await,
        };
        match result {
            Ok(()) => {}
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
                ) =>
            {
                debug!(%client, "peer vanished mid-reply");
                store.borrow_mut().disconnect_client(client);
                return;
            }
            Err(e) => {
                let _ = fatal_tx.send(FatalError::CommandIo(e));
                return;
            }
        }
    }
}
