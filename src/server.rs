//! The server reactor: one accept loop, a decode-and-deliver task per
//! connection bounded by the [`crate::worker_pool::DecodeWorkerPool`], and
//! a writer task per connection draining its outbound queue.
//!
//! The accept loop and its `tokio_rustls` TLS-acceptor branch run as a
//! single always-on task owned by an explicit `Server` handle, so
//! [`Server::stop`] has something to hold onto.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::buffer_pool::BufferPool;
use crate::codec::{Decoded, FrameCodec};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::draft::{Draft, Rfc6455};
use crate::error::Error;
use crate::event::{generate_new_uuid, Event, EventStream, ID};
use crate::frame::{CloseCode, Frame};
use crate::heartbeat;
use crate::message::Message;
use crate::registry::{ConnectionHandle, ConnectionRegistry, MutexConnectionRegistry};
use crate::state::{ConnectionActivity, Role};
use crate::stream::EngineStream;
use crate::worker_pool::DecodeWorkerPool;

const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// A running server. Dropping this without calling [`Server::stop`] aborts
/// the accept loop and heartbeat immediately (their `JoinHandle`s are
/// owned here, not detached, unless `detach_workers` says otherwise for
/// decode tasks specifically).
pub struct Server {
    registry: Arc<dyn ConnectionRegistry>,
    accept_handle: JoinHandle<()>,
    heartbeat_handle: Option<JoinHandle<()>>,
    close_timeout: Duration,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `addr` and starts the accept loop. Returns the `Server`
    /// handle plus the `EventStream` the application drives.
    ///
    /// Binding goes through `socket2` rather than `TcpListener::bind`
    /// directly so `config.so_reuseaddr` can be applied before `listen()`
    /// — tokio's own `bind` doesn't set `SO_REUSEADDR` for us.
    pub async fn bind(addr: &str, config: ServerConfig) -> Result<(Self, EventStream), Error> {
        let socket_addr: SocketAddr = addr.parse().map_err(|_| Error::URLNoHost)?;
        let domain = if socket_addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(config.so_reuseaddr)?;
        socket.set_nonblocking(true)?;
        socket.bind(&socket_addr.into())?;
        socket.listen(1024)?;
        let listener = TcpListener::from_std(socket.into())?;
        Self::from_listener(listener, config)
    }

    fn from_listener(
        listener: TcpListener,
        config: ServerConfig,
    ) -> Result<(Self, EventStream), Error> {
        let local_addr = listener.local_addr()?;
        let registry: Arc<dyn ConnectionRegistry> = config
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(MutexConnectionRegistry::new()));
        let worker_pool = Arc::new(DecodeWorkerPool::new(config.worker_count, config.detach_workers));
        worker_pool.mark_started();
        let buffer_pool = Arc::new(BufferPool::with_defaults(config.worker_count * 2));

        let (events_tx, events_rx) = mpsc::channel(1024);

        let heartbeat_handle = heartbeat::spawn(registry.clone(), config.heartbeat_period);

        let accept_registry = registry.clone();
        let accept_config = config.clone();
        let accept_handle = tokio::spawn(async move {
            accept_loop(
                listener,
                accept_config,
                accept_registry,
                worker_pool,
                buffer_pool,
                events_tx,
            )
            .await;
        });

        Ok((
            Server {
                registry,
                accept_handle,
                heartbeat_handle,
                close_timeout: config.close_timeout,
                local_addr,
            },
            EventStream::new(events_rx),
        ))
    }

    /// The bound local address — most useful when `bind` was called with
    /// port `0` and the caller needs to learn which port the OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends `message` to every registered connection. A connection that
    /// is no longer writable (already closing, or its outbound queue is
    /// full) is silently skipped — matching the source's behavior of
    /// swallowing `WebsocketNotConnectedException` per connection rather
    /// than failing the whole broadcast.
    pub fn broadcast(&self, message: Message) {
        for handle in self.registry.snapshot() {
            let _ = handle.send_message(message.clone());
        }
    }

    /// A snapshot of currently registered connection handles, for callers
    /// that want to address individual connections directly.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.registry.snapshot()
    }

    /// Broadcasts `CLOSE(1001 GOING_AWAY)` to every registered connection,
    /// waits up to `timeout` for writers to drain, then tears down the
    /// accept loop and heartbeat unconditionally.
    pub async fn stop(self, timeout: Duration) {
        for handle in self.registry.snapshot() {
            let _ = handle
                .close_tx
                .try_send((CloseCode::GoingAway, "server shutting down".to_string()));
        }

        let deadline = tokio::time::Instant::now() + timeout.max(self.close_timeout);
        while tokio::time::Instant::now() < deadline {
            if self.registry.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        self.accept_handle.abort();
        if let Some(handle) = self.heartbeat_handle {
            handle.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<dyn ConnectionRegistry>,
    worker_pool: Arc<DecodeWorkerPool>,
    buffer_pool: Arc<BufferPool>,
    events_tx: mpsc::Sender<Event>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("accept failed: {err}");
                continue;
            }
        };

        if let Some(on_connect) = &config.on_connect {
            // Runs on the reactor task itself: a slow admission hook stalls
            // further accepts. Documented, not "fixed" — see DESIGN.md.
            if !on_connect(&peer_addr) {
                continue;
            }
        }

        if config.tcp_nodelay {
            let _ = stream.set_nodelay(true);
        }
        // Keepalive is always enabled on accepted sockets, per spec — there
        // is no corresponding off switch in the configuration knobs.
        let keepalive = socket2::TcpKeepalive::new();
        let _ = socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive);

        let config = config.clone();
        let registry = registry.clone();
        let worker_pool = worker_pool.clone();
        let buffer_pool = buffer_pool.clone();
        let events_tx = events_tx.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_connection(
                stream,
                peer_addr,
                config,
                registry,
                worker_pool,
                buffer_pool,
                events_tx.clone(),
            )
            .await
            {
                let id = generate_new_uuid();
                let _ = events_tx.send(Event::Error(id, err)).await;
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    _peer_addr: SocketAddr,
    config: ServerConfig,
    registry: Arc<dyn ConnectionRegistry>,
    worker_pool: Arc<DecodeWorkerPool>,
    buffer_pool: Arc<BufferPool>,
    events_tx: mpsc::Sender<Event>,
) -> Result<(), Error> {
    let mut socket = match &config.tls_config {
        Some(tls_config) => {
            let acceptor = TlsAcceptor::from(tls_config.clone());
            EngineStream::Secure(tokio_rustls::TlsStream::Server(
                acceptor.accept(stream).await?,
            ))
        }
        None => EngineStream::Plain(stream),
    };

    let request_bytes = read_http_request(&mut socket).await?;
    let draft = Rfc6455;
    let accept = draft.accept_handshake_as_server(&request_bytes)?;
    socket.write_all(accept.response.as_bytes()).await?;

    let id = generate_new_uuid();
    let wsconfig = &config.web_socket_config;
    let max_frame_size = wsconfig.max_frame_size.unwrap_or(16 << 20);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(wsconfig.outbound_queue_capacity);
    let (close_tx, mut close_rx) = mpsc::channel::<(CloseCode, String)>(1);
    let activity = Arc::new(ConnectionActivity::new());
    let shutdown = Arc::new(Notify::new());
    let writer_done = Arc::new(Notify::new());

    registry.add(ConnectionHandle {
        id,
        outbound: outbound_tx.clone(),
        max_frame_size,
        activity: activity.clone(),
        shutdown: shutdown.clone(),
        close_tx: close_tx.clone(),
    });

    let mut connection = Connection::new(
        id,
        Role::Server,
        max_frame_size,
        wsconfig.max_message_size,
        outbound_tx,
        activity,
    );
    connection.on_handshake_ok()?;

    let (mut read_half, mut write_half) = tokio::io::split(socket);

    let writer_writer_done = writer_done.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let is_close = frame.opcode == crate::frame::OpCode::Close;
            let encoded = FrameCodec::encode(&frame, Role::Server);
            if write_half.write_all(&encoded).await.is_err() {
                break;
            }
            if is_close {
                // CLOSE is always the last frame a connection sends —
                // stop pumping the channel instead of waiting for every
                // sender (including ones the application may still hold
                // via a `ConnectionHandle`) to drop.
                break;
            }
        }
        let _ = write_half.shutdown().await;
        writer_writer_done.notify_one();
    });

    events_tx
        .send(Event::NewClient(
            id,
            ConnectionHandle {
                id,
                outbound: connection_outbound(&connection),
                max_frame_size,
                activity: connection_activity(&connection),
                shutdown: shutdown.clone(),
                close_tx: close_tx.clone(),
            },
        ))
        .await
        .ok();

    let mut staging = buffer_pool.take().await;
    let result = reader_loop(
        &mut read_half,
        &mut staging,
        &mut connection,
        &worker_pool,
        &events_tx,
        &shutdown,
        &writer_done,
        &mut close_rx,
        config.close_timeout,
    )
    .await;
    buffer_pool.release(staging).await;

    registry.remove(id);
    writer_task.abort();

    if let Err(err) = result {
        let _ = events_tx.send(Event::Error(id, err)).await;
    }

    Ok(())
}

/// `Connection` doesn't expose its internal `Sender`/`Arc<ConnectionActivity>`
/// directly (they're private to keep the state machine in charge of the
/// outbound queue); these accessors exist only so the `NewClient` event can
/// carry a handle identical to the one already in the registry.
fn connection_outbound(connection: &Connection) -> mpsc::Sender<Frame> {
    connection.outbound_sender()
}

fn connection_activity(connection: &Connection) -> Arc<ConnectionActivity> {
    connection.activity_handle()
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    read_half: &mut (impl AsyncReadExt + Unpin),
    staging: &mut BytesMut,
    connection: &mut Connection,
    worker_pool: &Arc<DecodeWorkerPool>,
    events_tx: &mpsc::Sender<Event>,
    shutdown: &Arc<Notify>,
    writer_done: &Arc<Notify>,
    close_rx: &mut mpsc::Receiver<(CloseCode, String)>,
    close_timeout: Duration,
) -> Result<(), Error> {
    let mut read_buf = vec![0u8; crate::frame::DEFAULT_RCVBUF];
    'outer: loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.notified() => {
                let event = connection.on_io_error();
                let _ = events_tx.send(to_event(connection.id, event)).await;
                return Ok(());
            }
            Some((code, reason)) = close_rx.recv() => {
                // Application-initiated close: enter Closing and arm the
                // close-deadline (force-close with 1006 if the
                // peer never echoes CLOSE within `close_timeout`).
                if connection.close(code, reason).is_ok() {
                    let deadline_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(close_timeout).await;
                        deadline_shutdown.notify_one();
                    });
                }
                continue;
            }
            n = read_half.read(&mut read_buf) => n?,
        };

        if n == 0 {
            let event = connection.on_io_error();
            let _ = events_tx.send(to_event(connection.id, event)).await;
            return Ok(());
        }
        staging.extend_from_slice(&read_buf[..n]);

        let _permit = worker_pool.acquire().await;
        loop {
            let frame = match FrameCodec::decode(staging) {
                Ok(Decoded::Incomplete) => break,
                Ok(Decoded::Frame(frame)) => frame,
                Err(err) => {
                    if close_on_protocol_violation(connection, &err, shutdown, close_timeout).await {
                        continue 'outer;
                    }
                    return Err(err);
                }
            };
            match connection.receive(frame) {
                Ok(Some(ConnectionEvent::Closing)) => {
                    // The close handshake is underway (peer-initiated, or
                    // the echo confirming our own locally-initiated
                    // close); `Closed` fires once the writer confirms the
                    // queued/echoed CLOSE frame reached the wire — it
                    // exits on its own right after writing one.
                    let _ = tokio::time::timeout(close_timeout, writer_done.notified()).await;
                    let event = connection.finalize_close();
                    let _ = events_tx.send(to_event(connection.id, event)).await;
                    return Ok(());
                }
                Ok(Some(event)) => {
                    let _ = events_tx.send(to_event(connection.id, event)).await;
                }
                Ok(None) => {}
                Err(err) => {
                    if close_on_protocol_violation(connection, &err, shutdown, close_timeout).await {
                        continue 'outer;
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// A framing/fragmentation violation doesn't sever the socket outright —
/// RFC 6455 still expects a `CLOSE(1002)` (or the more specific code) on
/// the wire before teardown. Queues that close and arms the same
/// force-close deadline a locally requested close uses. Returns `true`
/// once handled (the caller should
/// keep the reader loop running so the peer's echoed CLOSE — or the
/// deadline — ends the connection); `false` for errors that aren't
/// protocol violations, which the caller still tears down immediately.
async fn close_on_protocol_violation(
    connection: &mut Connection,
    err: &Error,
    shutdown: &Arc<Notify>,
    close_timeout: Duration,
) -> bool {
    let Some(code) = err.protocol_close_code() else {
        return false;
    };
    if connection.close(code, err.to_string()).is_ok() {
        let deadline_shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(close_timeout).await;
            deadline_shutdown.notify_one();
        });
    }
    true
}

fn to_event(id: ID, event: ConnectionEvent) -> Event {
    match event {
        ConnectionEvent::Fragment(info) => Event::Fragment(id, info),
        ConnectionEvent::Message(message) => Event::NewMessage(id, message),
        ConnectionEvent::Closed(close_info) => Event::Disconnect(id, close_info),
        ConnectionEvent::Closing => {
            unreachable!("reader_loop finalizes Closing before it reaches to_event")
        }
    }
}

async fn read_http_request(socket: &mut EngineStream) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    while buf.len() < MAX_HANDSHAKE_BYTES {
        let n = tokio::time::timeout(Duration::from_secs(10), socket.read(&mut byte))
            .await
            .map_err(|_| Error::IncompleteHTTPRequest)??;
        if n == 0 {
            return Err(Error::IncompleteHTTPRequest);
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            return Ok(buf);
        }
    }
    Err(Error::InvalidHTTPHandshake)
}
