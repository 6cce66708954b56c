//! Connection task and the cloneable handle in front of it.
//!
//! One spawned task owns the transport, the packet codec, the lifecycle state
//! machine and the command queue. Handles talk to it over an unbounded
//! channel; every command carries a oneshot that the task completes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::command::{BoxError, Command, MetadataHandler, Ping, QueryMetadata, RowHandler};
use super::prepared::PreparedQuery;
use super::query::QueryCommand;
use super::queue::{CommandQueue, Completion, Outbound};
use super::row::MySqlRow;
use super::stream::{MySqlStream, RawStream};
use super::tls::TlsSettings;
use crate::config::{MySqlConfig, TlsMode};
use crate::error::{MySqlError, MySqlResult};
use crate::protocol::handshake::default_connection_attributes;
use crate::protocol::lifecycle::{Action, Event, HandshakeParams, Lifecycle, SessionInfo};
use crate::protocol::packet::PacketCodec;
use crate::types::MySqlValue;

/// Initial buffer capacity
const BUFFER_CAPACITY: usize = 16 * 1024;

enum Request {
    Command {
        command: Box<dyn Command>,
        completion: Completion,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Resolves when a submitted command completes.
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<MySqlResult<()>>,
}

impl Future for CommandHandle {
    type Output = MySqlResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(MySqlError::Closed)))
    }
}

/// Rows plus the combined statement summary.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<MySqlRow>,
    pub metadata: QueryMetadata,
}

/// Handle to a MySQL/MariaDB connection.
///
/// Cheap to clone; all clones share one connection and one FIFO queue.
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    requests: mpsc::UnboundedSender<Request>,
    session: Arc<SessionInfo>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Command { command, .. } => write!(f, "Command({})", command.name()),
            Request::Close { .. } => f.write_str("Close"),
        }
    }
}

impl MySqlConnection {
    /// Connect over TCP, or the Unix socket when `config.socket` is set.
    pub async fn connect(config: &MySqlConfig) -> MySqlResult<Self> {
        let stream = timeout(config.connect_timeout, open_stream(config))
            .await
            .map_err(|_| MySqlError::Timeout)??;
        timeout(config.connect_timeout, Self::establish(stream, config))
            .await
            .map_err(|_| MySqlError::Timeout)?
    }

    /// Run the protocol over an already-connected stream.
    pub async fn connect_stream<S: RawStream>(stream: S, config: &MySqlConfig) -> MySqlResult<Self> {
        let stream = MySqlStream::Custom(Box::new(stream));
        timeout(config.connect_timeout, Self::establish(stream, config))
            .await
            .map_err(|_| MySqlError::Timeout)?
    }

    async fn establish(stream: MySqlStream, config: &MySqlConfig) -> MySqlResult<Self> {
        let tls = match config.tls_mode {
            TlsMode::Disable => None,
            TlsMode::Prefer | TlsMode::Require => Some(TlsSettings::from_config(config)?),
        };
        let mut attributes = default_connection_attributes();
        attributes.extend(config.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let params = HandshakeParams {
            username: config.user.clone(),
            password: config.password.clone().unwrap_or_default().into_bytes(),
            database: config.database.clone(),
            tls_mode: config.tls_mode,
            secure_transport: stream.is_secure(),
            charset: config.charset,
            max_packet_size: config.max_packet_size,
            attributes,
            capabilities: config.desired_capabilities(),
        };

        let (requests, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = ConnectionTask {
            stream,
            codec: PacketCodec::new(),
            read_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            write_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            lifecycle: Lifecycle::Start,
            params,
            tls,
            queue: CommandQueue::new(),
            requests: rx,
            ready: Some(ready_tx),
            close_waiters: Vec::new(),
        };
        tokio::spawn(task.run());

        let session = ready_rx.await.map_err(|_| MySqlError::Closed)??;
        Ok(Self {
            requests,
            session: Arc::new(session),
        })
    }

    /// What the server reported during the handshake.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Queue a command. Fails immediately if the connection is gone.
    pub fn submit(&self, command: impl Command) -> MySqlResult<CommandHandle> {
        let (completion, rx) = oneshot::channel();
        self.requests
            .send(Request::Command {
                command: Box::new(command),
                completion,
            })
            .map_err(|_| MySqlError::Closed)?;
        Ok(CommandHandle { rx })
    }

    /// Run SQL through the text protocol and collect the rows.
    pub async fn simple_query(&self, sql: &str) -> MySqlResult<Vec<MySqlRow>> {
        Ok(self.text_query(sql).await?.rows)
    }

    /// Run one or more `;`-separated statements. Affected rows and warnings
    /// are summed; the rest of the summary comes from the last statement.
    pub async fn execute(&self, sql: &str) -> MySqlResult<QueryMetadata> {
        Ok(self.text_query(sql).await?.metadata)
    }

    /// Prepare, execute with `params`, close, and collect the rows.
    pub async fn query(&self, sql: &str, params: &[MySqlValue]) -> MySqlResult<QueryResult> {
        let (on_row, on_metadata, collected) = collector();
        let command = PreparedQuery::new(sql, params.to_vec(), on_row, on_metadata);
        self.submit(command)?.await?;
        Ok(collected.finish())
    }

    /// Like [`query`](Self::query), but hands each row to `on_row` as it is
    /// decoded. An error from `on_row` stops delivery; the statement is still
    /// drained and closed before the error is returned.
    pub async fn query_with<F>(
        &self,
        sql: &str,
        params: &[MySqlValue],
        on_row: F,
    ) -> MySqlResult<QueryMetadata>
    where
        F: FnMut(MySqlRow) -> Result<(), BoxError> + Send + 'static,
    {
        let (_, on_metadata, collected) = collector();
        let command = PreparedQuery::new(sql, params.to_vec(), Box::new(on_row), on_metadata);
        self.submit(command)?.await?;
        Ok(collected.finish().metadata)
    }

    pub async fn ping(&self) -> MySqlResult<()> {
        self.submit(Ping)?.await
    }

    /// Send COM_QUIT and shut the transport down. Queued commands fail with
    /// [`MySqlError::Closed`].
    pub async fn close(&self) -> MySqlResult<()> {
        let (done, rx) = oneshot::channel();
        if self.requests.send(Request::Close { done }).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    async fn text_query(&self, sql: &str) -> MySqlResult<QueryResult> {
        let (on_row, on_metadata, collected) = collector();
        self.submit(QueryCommand::new(sql, on_row, on_metadata))?.await?;
        Ok(collected.finish())
    }
}

/// Receiving ends for rows and summaries pushed by the connection task.
struct Collected {
    rows: mpsc::UnboundedReceiver<MySqlRow>,
    metadata: mpsc::UnboundedReceiver<QueryMetadata>,
}

impl Collected {
    /// Drain everything delivered. Only valid once the command completed.
    fn finish(mut self) -> QueryResult {
        let mut result = QueryResult::default();
        while let Ok(row) = self.rows.try_recv() {
            result.rows.push(row);
        }
        let mut affected_rows = 0u64;
        let mut warnings = 0u16;
        while let Ok(metadata) = self.metadata.try_recv() {
            affected_rows = affected_rows.saturating_add(metadata.affected_rows);
            warnings = warnings.saturating_add(metadata.warnings);
            result.metadata = metadata;
        }
        result.metadata.affected_rows = affected_rows;
        result.metadata.warnings = warnings;
        result
    }
}

fn collector() -> (RowHandler, MetadataHandler, Collected) {
    let (row_tx, rows) = mpsc::unbounded_channel();
    let (meta_tx, metadata) = mpsc::unbounded_channel();
    let on_row: RowHandler = Box::new(move |row| {
        row_tx.send(row).map_err(|_| BoxError::from("row receiver dropped"))
    });
    let on_metadata: MetadataHandler = Box::new(move |meta| {
        let _ = meta_tx.send(meta);
    });
    (on_row, on_metadata, Collected { rows, metadata })
}

async fn open_stream(config: &MySqlConfig) -> MySqlResult<MySqlStream> {
    if let Some(path) = &config.socket {
        #[cfg(unix)]
        {
            debug!(socket = %path, "connecting over unix socket");
            return Ok(MySqlStream::Unix(UnixStream::connect(path).await?));
        }
        #[cfg(not(unix))]
        {
            return Err(MySqlError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("unix sockets are not available here: {}", path),
            )));
        }
    }
    debug!(host = %config.host, port = config.port, "connecting over TCP");
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    tcp.set_nodelay(true)?;
    Ok(MySqlStream::Tcp(tcp))
}

struct ConnectionTask {
    stream: MySqlStream,
    codec: PacketCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    lifecycle: Lifecycle,
    params: HandshakeParams,
    tls: Option<TlsSettings>,
    queue: CommandQueue,
    requests: mpsc::UnboundedReceiver<Request>,
    ready: Option<oneshot::Sender<MySqlResult<SessionInfo>>>,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl ConnectionTask {
    async fn run(mut self) {
        self.dispatch(Event::TransportActive).await;
        while !self.lifecycle.is_closed() {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Command { command, completion }) => {
                        let out = self.queue.push(command, completion);
                        self.write_or_fail(out).await;
                    }
                    Some(Request::Close { done }) => {
                        self.close_waiters.push(done);
                        self.dispatch(Event::Close).await;
                    }
                    None => {
                        trace!("all handles dropped");
                        self.dispatch(Event::Close).await;
                    }
                },
                read = self.stream.read_buf(&mut self.read_buf) => match read {
                    Ok(0) => {
                        let event = if self.codec.has_partial() || !self.read_buf.is_empty() {
                            Event::Error(MySqlError::Framing("connection closed mid-packet".into()))
                        } else {
                            Event::TransportClosed
                        };
                        self.dispatch(event).await;
                    }
                    Ok(_) => self.process_inbound().await,
                    Err(e) => self.dispatch(Event::Error(e.into())).await,
                },
            }
        }

        self.queue.fail_all();
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Command { completion, .. } => {
                    let _ = completion.send(Err(MySqlError::Closed));
                }
                Request::Close { done } => self.close_waiters.push(done),
            }
        }
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(MySqlError::Closed));
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!("connection task finished");
    }

    async fn process_inbound(&mut self) {
        while !self.lifecycle.is_closed() {
            let packet = match self.codec.decode(&mut self.read_buf) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    self.dispatch(Event::Error(e)).await;
                    break;
                }
            };
            trace!(sequence = packet.sequence, len = packet.payload.len(), "packet received");
            if self.lifecycle.is_ready() {
                match self.queue.handle(packet) {
                    Ok(out) => self.write_or_fail(out).await,
                    Err(e) => self.dispatch(Event::Error(e)).await,
                }
            } else {
                self.dispatch(Event::Packet(packet)).await;
            }
        }
    }

    /// Feed the lifecycle machine and carry out what it asks for.
    async fn dispatch(&mut self, event: Event) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let state = std::mem::replace(&mut self.lifecycle, Lifecycle::Closed);
            let from = state.name();
            let (next, actions) = state.on_event(event, &self.params);
            if next.name() != from {
                trace!(from, to = next.name(), "lifecycle transition");
            }
            self.lifecycle = next;
            for action in actions {
                match self.perform(action).await {
                    Ok(Some(follow_up)) => events.push_back(follow_up),
                    Ok(None) => {}
                    Err(e) => {
                        events.push_back(Event::Error(e));
                        break;
                    }
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> MySqlResult<Option<Event>> {
        match action {
            Action::Read => {}
            Action::Send {
                payload,
                resequence,
            } => {
                self.write(vec![Outbound {
                    packets: vec![payload],
                    resequence,
                }])
                .await?;
            }
            Action::StartTls => {
                let tls = self
                    .tls
                    .clone()
                    .ok_or_else(|| MySqlError::Tls("server asked for TLS but it is disabled".into()))?;
                let stream = self.stream.detach();
                self.stream = tls.upgrade(stream).await?;
                return Ok(Some(Event::TlsEstablished));
            }
            Action::Established(session) => {
                info!(
                    connection_id = session.connection_id,
                    server_version = %session.server_version,
                    "connection established"
                );
                let out = self.queue.start(session.capabilities);
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(session));
                }
                self.write(out).await?;
            }
            Action::Shutdown => {
                let _ = self.stream.shutdown().await;
            }
            Action::Fail(err) => {
                match self.ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(err));
                    }
                    None => warn!(error = %err, "connection failed"),
                }
                self.queue.fail_all();
            }
        }
        Ok(None)
    }

    async fn write_or_fail(&mut self, out: Vec<Outbound>) {
        if let Err(e) = self.write(out).await {
            self.dispatch(Event::Error(e)).await;
        }
    }

    async fn write(&mut self, out: Vec<Outbound>) -> MySqlResult<()> {
        if out.is_empty() {
            return Ok(());
        }
        for outbound in out {
            if outbound.resequence {
                self.codec.reset_sequence();
            }
            for payload in &outbound.packets {
                self.codec.encode(payload, &mut self.write_buf);
            }
        }
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        self.stream.flush().await?;
        Ok(())
    }
}
