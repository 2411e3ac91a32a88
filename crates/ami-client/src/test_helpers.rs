//! Scriptable in-process AMI server for tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ami_proto::{AmiCodec, Message};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::AmiConfig;

pub const USERNAME: &str = "admin";
pub const SECRET: &str = "secret";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// What the mock does with an inbound action.
pub enum Reply {
    Send(Vec<Message>),
    Silent,
    Close,
}

type Handler = Arc<dyn Fn(&Message) -> Reply + Send + Sync>;

enum Push {
    Send(Message),
    Close,
}

/// In-process AMI server answering `Login` and `Logoff`.
pub struct MockAmi {
    pub addr: SocketAddr,
    push: mpsc::UnboundedSender<Push>,
    received: Arc<Mutex<Vec<Message>>>,
}

impl MockAmi {
    /// Accepts logins, ignores every other action.
    pub async fn start() -> Self {
        Self::with_handler(|_| Reply::Silent).await
    }

    /// `Login` and `Logoff` are answered built-in; everything else goes to
    /// `handler`. Connections are served one at a time.
    pub async fn with_handler(handler: impl Fn(&Message) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock AMI listener");
        let addr = listener.local_addr().expect("mock AMI local addr");
        let (push, mut push_rx) = mpsc::unbounded_channel::<Push>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);
        let log = Arc::clone(&received);

        let _ = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"Asterisk Call Manager/5.0.1\r\n").await;
                let (rd, wr) = stream.into_split();
                let mut reader = FramedRead::new(rd, AmiCodec::new());
                let mut writer = FramedWrite::new(wr, AmiCodec::new());
                'conn: loop {
                    tokio::select! {
                        frame = reader.next() => {
                            let Some(Ok(msg)) = frame else { break };
                            log.lock().push(msg.clone());
                            match respond(&msg, &handler) {
                                Reply::Send(replies) => {
                                    for reply in replies {
                                        if writer.send(reply).await.is_err() {
                                            break 'conn;
                                        }
                                    }
                                }
                                Reply::Silent => {}
                                Reply::Close => break,
                            }
                        }
                        push = push_rx.recv() => match push {
                            Some(Push::Send(msg)) => {
                                let _ = writer.send(msg).await;
                            }
                            Some(Push::Close) | None => break,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            push,
            received,
        }
    }

    pub fn config(&self) -> AmiConfig {
        AmiConfig::new("127.0.0.1", self.addr.port(), USERNAME, SECRET)
    }

    /// Write an unsolicited message to the current connection.
    pub fn push(&self, msg: Message) {
        let _ = self.push.send(Push::Send(msg));
    }

    /// Drop the current connection from the server side.
    pub fn close_connection(&self) {
        let _ = self.push.send(Push::Close);
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Actions received with the given `Action` name.
    pub fn received_named(&self, name: &str) -> Vec<Message> {
        self.received
            .lock()
            .iter()
            .filter(|m| m.get("Action") == Some(name))
            .cloned()
            .collect()
    }

    /// Poll until at least `n` actions have arrived.
    pub async fn wait_for_received(&self, n: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.received.lock().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("mock AMI received too few actions");
    }
}

/// Listener that accepts connections, sends the greeting and then never
/// answers anything.
pub async fn unresponsive_ami() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind unresponsive AMI listener");
    let addr = listener.local_addr().expect("unresponsive AMI local addr");
    let _ = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"Asterisk Call Manager/5.0.1\r\n").await;
            held.push(stream);
        }
    });
    addr
}

fn respond(msg: &Message, handler: &Handler) -> Reply {
    let id = msg.action_id().unwrap_or_default();
    match msg.get("Action") {
        Some("Login") if msg.get("Secret") == Some(SECRET) => {
            Reply::Send(vec![response(id, "Success", "Authentication accepted")])
        }
        Some("Login") => Reply::Send(vec![response(id, "Error", "Authentication failed")]),
        Some("Logoff") => Reply::Send(vec![response(id, "Goodbye", "Thanks for all the fish.")]),
        _ => handler(msg),
    }
}

pub fn response(action_id: &str, status: &str, text: &str) -> Message {
    Message::new()
        .with("Response", status)
        .with("ActionID", action_id)
        .with("Message", text)
}

pub fn event(name: &str) -> Message {
    Message::new().with("Event", name)
}

/// `PJSIPShowEndpoints` answer with the given `ObjectName`/`Aor` pairs.
pub fn endpoint_list(action_id: &str, endpoints: &[(&str, &str)]) -> Vec<Message> {
    let mut out = vec![response(action_id, "Success", "A listing of Endpoints follows")];
    for (name, aor) in endpoints {
        out.push(
            Message::new()
                .with("Event", "EndpointList")
                .with("ActionID", action_id)
                .with("ObjectType", "endpoint")
                .with("ObjectName", *name)
                .with("Aor", *aor)
                .with("DeviceState", "Not in use")
                .with("Contacts", format!("{name}/sip:{name}@10.0.0.5:5060")),
        );
    }
    out.push(
        Message::new()
            .with("Event", "EndpointListComplete")
            .with("ActionID", action_id)
            .with("EventList", "Complete")
            .with("ListItems", endpoints.len().to_string()),
    );
    out
}
