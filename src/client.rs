//! Client-side connection driver.
//!
//! Connect sequence: optional proxy CONNECT tunnel, optional TLS wrap, the
//! draft's HTTP Upgrade handshake, then a reader task and a writer task
//! bound to the same [`crate::connection::Connection`] state machine the
//! server uses. Grounded on `src/handshake.rs`'s connect path and the
//! teacher's `examples/client.rs`/`examples/client_tls.rs` ticker-driven
//! send loop.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::codec::{Decoded, FrameCodec};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::draft::{Draft, Rfc6455};
use crate::error::Error;
use crate::event::{generate_new_uuid, Event, EventStream, ID};
use crate::frame::{CloseCode, Frame};
use crate::heartbeat;
use crate::message::Message;
use crate::registry::{ConnectionHandle, ConnectionRegistry, MutexConnectionRegistry};
use crate::state::{ConnectionActivity, Role};
use crate::stream::{EngineStream, TlsSessionInfo};

const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

tokio::task_local! {
    /// Set for the duration of the reader/writer tasks' bodies so
    /// [`Client::reconnect`] can detect — and refuse — being called from
    /// either of them (a client must not reconnect itself from inside its
    /// own reader or writer thread).
    static ON_IO_TASK: bool;
}

fn called_from_io_task() -> bool {
    ON_IO_TASK.try_with(|v| *v).unwrap_or(false)
}

/// Handle to a client-side WebSocket connection. Dial the endpoint with
/// [`Client::connect`]; drive the returned [`EventStream`] (directly, or
/// through an [`crate::event::WebSocketHandler`] via
/// [`crate::event::HandlerDriver`]) to receive messages.
pub struct Client {
    id: ID,
    url: String,
    config: ClientConfig,
    outbound: mpsc::Sender<Frame>,
    close_tx: mpsc::Sender<(CloseCode, String)>,
    activity: Arc<ConnectionActivity>,
    /// Single-entry registry reused as the heartbeat's connection set — a
    /// client has exactly one connection to keep alive.
    registry: Arc<MutexConnectionRegistry>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    open_notify: Arc<Notify>,
    opened: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    reconnecting: AtomicBool,
    tls_session: Option<TlsSessionInfo>,
}

impl Client {
    /// Dials `url` (e.g. `ws://host:port/path` or `wss://host:port/path`),
    /// performs the handshake, and spawns the reader and writer tasks.
    /// Returns once the handshake either succeeds or fails — there is no
    /// separate non-blocking variant in this port, since nothing useful can
    /// be done with a `Client` before the handshake resolves.
    pub async fn connect(url: impl Into<String>, config: ClientConfig) -> Result<(Self, EventStream), Error> {
        let url = url.into();
        let (events_tx, events_rx) = mpsc::channel(1024);
        let client = Self::dial(url, config, events_tx).await?;
        Ok((client, EventStream::new(events_rx)))
    }

    async fn dial(url: String, config: ClientConfig, events_tx: mpsc::Sender<Event>) -> Result<Self, Error> {
        let draft = Rfc6455;
        let built = draft.build_handshake_as_client(&url, &config.custom_headers)?;

        let (_, port_str) = built
            .host_with_port
            .rsplit_once(':')
            .ok_or(Error::URLNoPort)?;
        let port: u16 = port_str.parse().map_err(|_| Error::URLNoPort)?;

        let tcp = match &config.proxy {
            Some(proxy) => proxy.connect(&built.host, port).await?,
            None => {
                let connect_fut = TcpStream::connect(built.host_with_port.as_str());
                match config.connect_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, connect_fut).await??,
                    None => connect_fut.await?,
                }
            }
        };
        if config.tcp_nodelay {
            let _ = tcp.set_nodelay(true);
        }

        let mut socket = if built.use_tls {
            EngineStream::Secure(tokio_rustls::TlsStream::Client(
                wrap_tls(tcp, &built.host, config.ca_file.as_deref()).await?,
            ))
        } else {
            EngineStream::Plain(tcp)
        };

        socket.write_all(built.request.as_bytes()).await?;
        let response_bytes = read_http_response(&mut socket).await?;
        draft.accept_handshake_as_client(&response_bytes, &built.expected_accept)?;
        // Captured before the stream is split: `tokio_rustls::TlsStream`
        // only exposes the negotiated session on the unsplit stream.
        let tls_session = socket.tls_session_info();

        let id = generate_new_uuid();
        let wsconfig = &config.web_socket_config;
        let max_frame_size = wsconfig.max_frame_size.unwrap_or(16 << 20);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(wsconfig.outbound_queue_capacity);
        let (close_tx, mut close_rx) = mpsc::channel::<(CloseCode, String)>(1);
        let activity = Arc::new(ConnectionActivity::new());
        let shutdown = Arc::new(Notify::new());
        let writer_done = Arc::new(Notify::new());

        let mut connection = Connection::new(
            id,
            Role::Client,
            max_frame_size,
            wsconfig.max_message_size,
            outbound_tx.clone(),
            activity.clone(),
        );
        connection.on_handshake_ok()?;

        let registry = Arc::new(MutexConnectionRegistry::new());
        registry.add(ConnectionHandle {
            id,
            outbound: outbound_tx.clone(),
            max_frame_size,
            activity: activity.clone(),
            shutdown: shutdown.clone(),
            close_tx: close_tx.clone(),
        });

        let open_notify = Arc::new(Notify::new());
        let opened = Arc::new(AtomicBool::new(true));
        // `notify_one`, not `notify_waiters`: nothing is waiting on the
        // latch yet at this point, so the permit must be stored for
        // `connect_blocking`'s later `.notified().await` to consume.
        open_notify.notify_one();
        let _ = events_tx
            .send(Event::NewClient(
                id,
                ConnectionHandle {
                    id,
                    outbound: outbound_tx.clone(),
                    max_frame_size,
                    activity: activity.clone(),
                    shutdown: shutdown.clone(),
                    close_tx: close_tx.clone(),
                },
            ))
            .await;

        let (mut read_half, mut write_half) = tokio::io::split(socket);

        let writer_writer_done = writer_done.clone();
        let writer_task = tokio::spawn(ON_IO_TASK.scope(true, async move {
            while let Some(frame) = outbound_rx.recv().await {
                let is_close = frame.opcode == crate::frame::OpCode::Close;
                let encoded = FrameCodec::encode(&frame, Role::Client);
                if write_half.write_all(&encoded).await.is_err() {
                    break;
                }
                if is_close {
                    // CLOSE is always the last frame — stop pumping
                    // rather than waiting on every sender to drop.
                    break;
                }
            }
            // Drain whatever is left in the queue before the socket goes away.
            while let Ok(frame) = outbound_rx.try_recv() {
                let encoded = FrameCodec::encode(&frame, Role::Client);
                let _ = write_half.write_all(&encoded).await;
            }
            let _ = write_half.shutdown().await;
            writer_writer_done.notify_one();
        }));

        let close_notify = Arc::new(Notify::new());
        let reader_events_tx = events_tx.clone();
        let reader_close_notify = close_notify.clone();
        let close_timeout = config.close_timeout;
        let reader_task = tokio::spawn(ON_IO_TASK.scope(true, async move {
            let mut staging = BytesMut::with_capacity(crate::frame::DEFAULT_RCVBUF);
            reader_loop(
                &mut read_half,
                &mut staging,
                &mut connection,
                &reader_events_tx,
                &shutdown,
                &writer_done,
                &mut close_rx,
                close_timeout,
            )
            .await;
            // `notify_one`, matching the open latch: `close_blocking` may
            // not have started waiting yet when the reader task tears down.
            reader_close_notify.notify_one();
        }));

        let heartbeat_task = heartbeat::spawn(registry.clone(), config.heartbeat_period);

        Ok(Client {
            id,
            url,
            config,
            outbound: outbound_tx,
            close_tx,
            activity,
            registry,
            reader_task,
            writer_task,
            heartbeat_task,
            open_notify,
            opened,
            close_notify,
            reconnecting: AtomicBool::new(false),
            tls_session,
        })
    }

    /// Whether this connection is running over TLS.
    pub fn has_ssl_support(&self) -> bool {
        self.tls_session.is_some()
    }

    /// The negotiated TLS session — an illegal-state usage error on a
    /// plain-socket connection, mirroring the source library's
    /// `getSSLSession()` throwing rather than returning `null` there.
    pub fn ssl_session(&self) -> Result<&TlsSessionInfo, Error> {
        self.tls_session
            .as_ref()
            .ok_or(Error::IllegalState("connection has no TLS session"))
    }

    pub fn id(&self) -> ID {
        self.id
    }

    /// Returns the open-state of the connection once the connect latch
    /// fires — `false` means the connection failed before ever opening.
    /// In this port `connect` already resolves only after the handshake
    /// decides, so this simply reports that outcome.
    pub async fn connect_blocking(&self) -> bool {
        self.open_notify.notified().await;
        self.opened.load(Ordering::SeqCst)
    }

    /// Awaits the close latch — fires once the reader task has torn down.
    pub async fn close_blocking(&self) {
        self.close_notify.notified().await;
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.send_message(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Binary(data))
    }

    pub fn send_message(&self, message: Message) -> Result<(), Error> {
        if self.activity.is_closing() {
            return Err(Error::NotConnected);
        }
        for frame in message.to_frames(self.config.web_socket_config.max_frame_size.unwrap_or(16 << 20)) {
            self.outbound.try_send(frame).map_err(|_| Error::CommunicationError)?;
        }
        Ok(())
    }

    pub fn close(&self, code: CloseCode, reason: &str) -> Result<(), Error> {
        if self.activity.is_closing() {
            return Err(Error::NotConnected);
        }
        self.close_tx
            .try_send((code, reason.to_string()))
            .map_err(|_| Error::CommunicationError)
    }

    /// Tears down the current connection and dials `self.url` again.
    ///
    /// MUST NOT be called from the reader or writer task — doing so would
    /// deadlock the very tasks this call tears down and restarts.
    pub async fn reconnect(self) -> Result<(Self, EventStream), Error> {
        if called_from_io_task() {
            return Err(Error::IllegalState(
                "reconnect() must not be called from the reader or writer task",
            ));
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return Err(Error::IllegalState("reconnect already in progress"));
        }

        self.reader_task.abort();
        self.writer_task.abort();
        if let Some(handle) = self.heartbeat_task {
            handle.abort();
        }

        let url = self.url;
        let config = self.config;
        Self::connect(url, config).await
    }
}

async fn wrap_tls(
    tcp: TcpStream,
    host: &str,
    ca_file: Option<&str>,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, Error> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let pem = tokio::fs::read(path).await?;
            let mut reader = Cursor::new(pem);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert?;
                let _ = roots.add(cert);
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    let tls_config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = pki_types::ServerName::try_from(host.to_string())?;
    let stream = connector.connect(server_name, tcp).await?;
    Ok(stream)
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    read_half: &mut (impl AsyncReadExt + Unpin),
    staging: &mut BytesMut,
    connection: &mut Connection,
    events_tx: &mpsc::Sender<Event>,
    shutdown: &Arc<Notify>,
    writer_done: &Arc<Notify>,
    close_rx: &mut mpsc::Receiver<(CloseCode, String)>,
    close_timeout: std::time::Duration,
) {
    let mut read_buf = vec![0u8; crate::frame::DEFAULT_RCVBUF];
    'outer: loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.notified() => {
                let event = connection.on_io_error();
                let _ = events_tx.send(to_event(connection.id, event)).await;
                return;
            }
            Some((code, reason)) = close_rx.recv() => {
                if connection.close(code, reason).is_ok() {
                    let deadline_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(close_timeout).await;
                        deadline_shutdown.notify_one();
                    });
                }
                continue;
            }
            n = read_half.read(&mut read_buf) => {
                match n {
                    Ok(n) => n,
                    Err(_) => {
                        let event = connection.on_io_error();
                        let _ = events_tx.send(to_event(connection.id, event)).await;
                        return;
                    }
                }
            }
        };

        if n == 0 {
            let event = connection.on_io_error();
            let _ = events_tx.send(to_event(connection.id, event)).await;
            return;
        }
        staging.extend_from_slice(&read_buf[..n]);

        loop {
            match FrameCodec::decode(staging) {
                Ok(Decoded::Incomplete) => break,
                Ok(Decoded::Frame(frame)) => match connection.receive(frame) {
                    Ok(Some(ConnectionEvent::Closing)) => {
                        let _ = tokio::time::timeout(close_timeout, writer_done.notified()).await;
                        let event = connection.finalize_close();
                        let _ = events_tx.send(to_event(connection.id, event)).await;
                        return;
                    }
                    Ok(Some(event)) => {
                        let _ = events_tx.send(to_event(connection.id, event)).await;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        if close_on_protocol_violation(connection, &err, shutdown, close_timeout).await {
                            continue 'outer;
                        }
                        let _ = events_tx.send(Event::Error(connection.id, err)).await;
                        return;
                    }
                },
                Err(err) => {
                    if close_on_protocol_violation(connection, &err, shutdown, close_timeout).await {
                        continue 'outer;
                    }
                    let _ = events_tx.send(Event::Error(connection.id, err)).await;
                    return;
                }
            }
        }
    }
}

/// Mirrors `server.rs`'s handling of the same name: a framing violation
/// queues a `CLOSE` with the RFC-mandated code instead of dropping the
/// socket, and arms a force-close deadline in case the peer never echoes
/// it back.
async fn close_on_protocol_violation(
    connection: &mut Connection,
    err: &Error,
    shutdown: &Arc<Notify>,
    close_timeout: std::time::Duration,
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

async fn read_http_response(socket: &mut EngineStream) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    while buf.len() < MAX_HANDSHAKE_BYTES {
        let n = socket.read(&mut byte).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Spins up a bare-bones server that performs the handshake by hand
    /// (no `Server`) so the client driver can be exercised in isolation.
    #[tokio::test]
    async fn connect_performs_handshake_and_opens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                socket.read_exact(&mut byte).await.unwrap();
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            let request = crate::handshake::parse_request(&buf).unwrap();
            let key = request.header("sec-websocket-key").unwrap();
            let accept = crate::utils::generate_websocket_accept_value(key);
            let response = crate::handshake::build_server_response(&accept);
            socket.write_all(response.as_bytes()).await.unwrap();
            // Keep the socket open for a beat so the client's reader settles.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let url = format!("ws://{addr}/");
        let (client, _events) = Client::connect(url, ClientConfig::default()).await.unwrap();
        assert!(client.connect_blocking().await);
    }

    #[tokio::test]
    async fn reconnect_refused_while_already_in_progress() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut byte = [0u8; 1];
                    loop {
                        if socket.read_exact(&mut byte).await.is_err() {
                            return;
                        }
                        buf.push(byte[0]);
                        if buf.ends_with(b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = crate::handshake::parse_request(&buf).unwrap();
                    let key = request.header("sec-websocket-key").unwrap();
                    let accept = crate::utils::generate_websocket_accept_value(key);
                    let response = crate::handshake::build_server_response(&accept);
                    let _ = socket.write_all(response.as_bytes()).await;
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                });
            }
        });

        let url = format!("ws://{addr}/");
        let (client, _events) = Client::connect(url, ClientConfig::default()).await.unwrap();
        client.reconnecting.store(true, Ordering::SeqCst);
        let err = client.reconnect().await.unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }
}
