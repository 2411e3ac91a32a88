//! AMI connection manager.
//!
//! [`AmiClient`] is a cheap handle. `connect` performs the TCP connect and
//! login handshake inline, then hands the socket to a connection task that
//! owns the correlator and all timers. Callers talk to that task over an
//! `mpsc` command channel and get answers back on `oneshot` channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ami_proto::{Action, AmiCodec, Message, MessageKind};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AmiConfig, ConnectionState};
use crate::correlator::{Correlator, Expiry, Responder, Routed};
use crate::error::{AmiError, Result};
use crate::fanout::{EventFanOut, EventSink, SubscriberId};
use crate::listing::ListSpec;

/// Command channel depth between handles and the connection task.
const COMMAND_BUFFER: usize = 64;
/// Upper bound on writing `Logoff` during an explicit disconnect.
const LOGOFF_TIMEOUT: Duration = Duration::from_secs(1);

type Reader = FramedRead<OwnedReadHalf, AmiCodec>;
type Writer = FramedWrite<OwnedWriteHalf, AmiCodec>;

enum Command {
    Send(Request),
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// An action waiting for an `ActionID`.
enum Request {
    Single {
        action: Action,
        timeout: Duration,
        respond_to: Responder<Message>,
    },
    List {
        action: Action,
        spec: ListSpec,
        timeout: Duration,
        respond_to: Responder<Vec<Message>>,
    },
}

struct Session {
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    config: AmiConfig,
}

struct Inner {
    fanout: Arc<EventFanOut>,
    state: Arc<watch::Sender<ConnectionState>>,
    next_id: Arc<AtomicU64>,
    session: Mutex<Option<Session>>,
    /// Serializes connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    /// Fired by `disconnect` to abandon a handshake in flight.
    connecting: Mutex<Option<CancellationToken>>,
}

/// Handle to the process-wide AMI connection.
#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<Inner>,
}

impl AmiClient {
    /// Disconnected client with an empty subscriber set.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                fanout: Arc::new(EventFanOut::new()),
                state: Arc::new(state),
                next_id: Arc::new(AtomicU64::new(1)),
                session: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                connecting: Mutex::new(None),
            }),
        }
    }

    /// Connect and log in, replacing any existing connection.
    ///
    /// Resolves once the server has accepted the login. A `disconnect`
    /// issued meanwhile abandons the handshake with
    /// [`AmiError::ConnectionLost`].
    pub async fn connect(&self, config: AmiConfig) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.shutdown_session().await;

        let cancel = CancellationToken::new();
        *self.inner.connecting.lock() = Some(cancel.clone());

        let addr = config.addr();
        info!(%addr, username = %config.username, "connecting to AMI");
        transition(&self.inner.state, ConnectionState::Connecting);

        let handshake = tokio::select! {
            () = cancel.cancelled() => {
                info!(%addr, "AMI connect abandoned by disconnect");
                Err(AmiError::ConnectionLost)
            }
            result = self.handshake(&config) => result,
        };
        *self.inner.connecting.lock() = None;
        let (reader, writer) = match handshake {
            Ok(io) => io,
            Err(e) => {
                transition(&self.inner.state, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let actor = ConnectionActor {
            reader,
            writer,
            cmd_rx,
            expiry_rx,
            correlator: Correlator::new(expiry_tx),
            fanout: Arc::clone(&self.inner.fanout),
            state: Arc::clone(&self.inner.state),
            next_id: Arc::clone(&self.inner.next_id),
        };
        {
            // Senders that see Connected block here until the session is in
            // place. The actor starts after the transition, so its own
            // Disconnected always lands last.
            let mut session = self.inner.session.lock();
            transition(&self.inner.state, ConnectionState::Connected);
            let _ = self.inner.fanout.notify_connection(true);
            let task = tokio::spawn(actor.run());
            *session = Some(Session {
                cmd_tx,
                task,
                config,
            });
        }
        metrics::counter!("ami_connects_total").increment(1);
        info!(%addr, "AMI connected");
        Ok(())
    }

    /// TCP connect plus login. The returned halves belong to a logged-in
    /// session.
    async fn handshake(&self, config: &AmiConfig) -> Result<(Reader, Writer)> {
        let addr = config.addr();
        let stream = match tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(AmiError::ConnectFailed { addr, source }),
            Err(_) => {
                return Err(AmiError::ConnectFailed {
                    addr,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (rd, wr) = stream.into_split();
        let mut reader = FramedRead::new(rd, AmiCodec::new());
        let mut writer = FramedWrite::new(wr, AmiCodec::new());

        let reply = self.login(config, &mut reader, &mut writer).await?;
        if !reply.is_success() {
            warn!(message = reply.text(), "AMI login rejected");
            return Err(AmiError::AuthenticationFailed {
                message: reply.text().to_owned(),
            });
        }
        Ok((reader, writer))
    }

    async fn login(
        &self,
        config: &AmiConfig,
        reader: &mut Reader,
        writer: &mut Writer,
    ) -> Result<Message> {
        let login_id = self.next_action_id();
        let login = Action::login(&config.username, &config.secret, config.events);
        transition(&self.inner.state, ConnectionState::AwaitingLoginResponse);
        writer.send(login.into_message(&login_id)).await?;

        tokio::time::timeout(
            config.action_timeout(),
            read_login_reply(reader, &login_id, &self.inner.fanout),
        )
        .await
        .map_err(|_| AmiError::ActionTimeout {
            action_id: login_id.clone(),
            timeout_ms: config.action_timeout_ms,
        })?
    }

    /// Close the connection, if any. Idempotent.
    ///
    /// A handshake in progress is abandoned at once.
    pub async fn disconnect(&self) {
        let pending = self.inner.connecting.lock().take();
        if let Some(cancel) = pending {
            cancel.cancel();
        }
        let _guard = self.inner.lifecycle.lock().await;
        self.shutdown_session().await;
    }

    async fn shutdown_session(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if session
            .cmd_tx
            .send(Command::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        if let Err(e) = session.task.await {
            warn!(error = %e, "connection task ended abnormally");
        }
        transition(&self.inner.state, ConnectionState::Disconnected);
    }

    /// Send an action with the session's default timeout.
    pub async fn send(&self, action: Action) -> Result<Message> {
        let timeout = self
            .config()
            .map_or(Duration::from_millis(crate::config::DEFAULT_ACTION_TIMEOUT_MS), |c| {
                c.action_timeout()
            });
        self.send_with_timeout(action, timeout).await
    }

    /// Send an action and wait up to `timeout` for its response.
    ///
    /// Fails with [`AmiError::NotConnected`] without touching the socket
    /// when no login has completed.
    pub async fn send_with_timeout(&self, action: Action, timeout: Duration) -> Result<Message> {
        let cmd_tx = self.command_sender()?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(Command::Send(Request::Single {
                action,
                timeout,
                respond_to: tx,
            }))
            .await
            .map_err(|_| AmiError::NotConnected)?;
        rx.await.map_err(|_| AmiError::ConnectionLost)?
    }

    /// Like [`send`](Self::send) but treats a non-`Success` response as an
    /// error.
    pub async fn send_checked(&self, action: Action) -> Result<Message> {
        let reply = self.send(action).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(AmiError::ActionFailed {
                response: reply.response().unwrap_or_default().to_owned(),
                message: reply.text().to_owned(),
            })
        }
    }

    /// Send a list action and gather its item events.
    ///
    /// Resolves on the complete event, or with whatever was collected when
    /// the list timeout elapses.
    pub async fn collect_list(&self, action: Action, spec: ListSpec) -> Result<Vec<Message>> {
        let timeout = self
            .config()
            .map_or(Duration::from_millis(crate::config::DEFAULT_LIST_TIMEOUT_MS), |c| {
                c.list_timeout()
            });
        let cmd_tx = self.command_sender()?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(Command::Send(Request::List {
                action,
                spec,
                timeout,
                respond_to: tx,
            }))
            .await
            .map_err(|_| AmiError::NotConnected)?;
        rx.await.map_err(|_| AmiError::ConnectionLost)?
    }

    fn command_sender(&self) -> Result<mpsc::Sender<Command>> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.cmd_tx.clone())
            .ok_or(AmiError::NotConnected)
    }

    fn next_action_id(&self) -> String {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether a login has completed and the socket is up.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Config of the live session.
    pub fn config(&self) -> Option<AmiConfig> {
        self.inner.session.lock().as_ref().map(|s| s.config.clone())
    }

    /// Shared event fan-out.
    pub fn fanout(&self) -> &Arc<EventFanOut> {
        &self.inner.fanout
    }

    /// Register a sink. It is first told the current connection state.
    pub fn attach(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        let state = Arc::clone(&self.inner.state);
        self.inner.fanout.subscribe_with(sink, move |sink| {
            let _ = sink.connection_changed(state.borrow().is_connected());
        })
    }

    /// Remove a sink registered with [`attach`](Self::attach).
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.inner.fanout.unsubscribe(id)
    }

    /// In-process event stream backed by a bounded channel.
    pub fn subscribe_events(
        &self,
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<Arc<Message>>) {
        self.inner.fanout.subscribe_channel(capacity)
    }
}

impl Default for AmiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Read until the response carrying `login_id`. Events seen meanwhile are
/// published.
async fn read_login_reply(
    reader: &mut Reader,
    login_id: &str,
    fanout: &EventFanOut,
) -> Result<Message> {
    while let Some(frame) = reader.next().await {
        let msg = frame?;
        match msg.kind() {
            MessageKind::Response if msg.action_id() == Some(login_id) => return Ok(msg),
            MessageKind::Event => {
                let _ = fanout.publish(&Arc::new(msg));
            }
            kind => debug!(%kind, "ignoring message during login"),
        }
    }
    Err(AmiError::ConnectionLost)
}

fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let _ = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        debug!(from = %current, to = %next, "connection state");
        *current = next;
        true
    });
}

/// Owns the socket, the correlator and the timers of one session.
struct ConnectionActor {
    reader: Reader,
    writer: Writer,
    cmd_rx: mpsc::Receiver<Command>,
    expiry_rx: mpsc::UnboundedReceiver<Expiry>,
    correlator: Correlator,
    fanout: Arc<EventFanOut>,
    state: Arc<watch::Sender<ConnectionState>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionActor {
    async fn run(mut self) {
        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown { respond_to }) => {
                        self.logoff().await;
                        shutdown_ack = Some(respond_to);
                        break;
                    }
                    Some(Command::Send(request)) => {
                        if let Err(e) = self.dispatch(request).await {
                            warn!(error = %e, "AMI write failed");
                            break;
                        }
                    }
                    None => {
                        debug!("all client handles dropped");
                        break;
                    }
                },
                frame = self.reader.next() => match frame {
                    Some(Ok(msg)) => self.handle_message(msg),
                    Some(Err(e)) => {
                        warn!(error = %e, "AMI stream error");
                        break;
                    }
                    None => {
                        info!("AMI connection closed by peer");
                        break;
                    }
                },
                Some(expiry) = self.expiry_rx.recv() => self.correlator.expire(expiry),
            }
        }

        self.correlator.fail_all(|| AmiError::ConnectionLost);
        transition(&self.state, ConnectionState::Disconnected);
        let _ = self.fanout.notify_connection(false);
        metrics::counter!("ami_disconnects_total").increment(1);
        info!("AMI disconnected");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let msg = match request {
            Request::Single {
                action,
                timeout,
                respond_to,
            } => {
                debug!(action = action.name(), action_id = %id, "sending action");
                let msg = action.into_message(&id);
                self.correlator.register(id, respond_to, timeout);
                msg
            }
            Request::List {
                action,
                spec,
                timeout,
                respond_to,
            } => {
                debug!(action = action.name(), action_id = %id, "sending list action");
                let msg = action.into_message(&id);
                self.correlator.register_list(id, spec, respond_to, timeout);
                msg
            }
        };
        metrics::counter!("ami_actions_sent_total").increment(1);
        self.writer.send(msg).await?;
        Ok(())
    }

    fn handle_message(&mut self, msg: Message) {
        match self.correlator.route(msg) {
            Routed::Event(event) => {
                metrics::counter!("ami_events_received_total").increment(1);
                let _ = self.fanout.publish(&event);
            }
            Routed::Resolved | Routed::Unmatched | Routed::Unclassified => {}
        }
    }

    async fn logoff(&mut self) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let msg = Action::logoff().into_message(&id);
        match tokio::time::timeout(LOGOFF_TIMEOUT, self.writer.send(msg)).await {
            Ok(Ok(())) => debug!("logoff sent"),
            Ok(Err(e)) => debug!(error = %e, "logoff not sent"),
            Err(_) => debug!("logoff write timed out"),
        }
    }
}
