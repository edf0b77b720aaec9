use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::{
  net::UnixStream,
  sync::{mpsc, oneshot},
  task::JoinHandle,
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, warn};

use super::{Address, Frame, IpcError, Pid, Term, envelope};

type FramedStream = Framed<UnixStream, LinesCodec>;
type Pending = Arc<DashMap<u64, oneshot::Sender<Term>>>;

/// Default deadline for calls made through the client.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A mailbox on a remote node, reached over its Unix socket.
///
/// Calls are multiplexed over the one connection: each gets a fresh ref
/// tag and the reply carrying that tag is routed back to the caller. Every
/// other delivered message (casts, `{'EXIT', Pid, Reason}` notices) lands
/// in the inbox read by [`Client::next_message`].
pub struct Client {
  pid: Pid,
  node: String,
  outbound: mpsc::Sender<Frame>,
  pending: Pending,
  inbox: mpsc::UnboundedReceiver<Term>,
  counter: AtomicU64,
  task: JoinHandle<()>,
}

impl Client {
  pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
    let stream = UnixStream::connect(socket_path).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());

    let (pid, node) = match framed.next().await {
      Some(line) => match serde_json::from_str::<Frame>(&line?)? {
        Frame::Welcome { pid, node } => (pid, node),
        other => return Err(IpcError::Protocol(format!("expected welcome, got {other:?}"))),
      },
      None => return Err(IpcError::Connection("closed before welcome".into())),
    };
    debug!(%pid, node = %node, "Connected to node");

    let (sink, read_stream) = framed.split();
    let (outbound, outbound_rx) = mpsc::channel(64);
    let (inbox_tx, inbox) = mpsc::unbounded_channel();
    let pending: Pending = Arc::new(DashMap::new());
    let task = tokio::spawn(Self::multiplexer(
      sink,
      read_stream,
      outbound_rx,
      Arc::clone(&pending),
      inbox_tx,
    ));

    Ok(Self {
      pid,
      node,
      outbound,
      pending,
      inbox,
      counter: AtomicU64::new(1),
      task,
    })
  }

  async fn multiplexer(
    mut sink: futures::stream::SplitSink<FramedStream, String>,
    mut stream: futures::stream::SplitStream<FramedStream>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    pending: Pending,
    inbox: mpsc::UnboundedSender<Term>,
  ) {
    loop {
      tokio::select! {
        outbound = outbound_rx.recv() => {
          let Some(frame) = outbound else {
            debug!("client closed");
            break;
          };
          match serde_json::to_string(&frame) {
            Ok(json) => {
              if let Err(e) = sink.send(json).await {
                error!("failed to send frame: {e}");
                break;
              }
            }
            Err(e) => error!("failed to encode frame: {e}"),
          }
        }

        result = stream.next() => {
          match result {
            Some(Ok(line)) => match serde_json::from_str::<Frame>(&line) {
              Ok(Frame::Deliver { msg }) => route(msg, &pending, &inbox),
              Ok(other) => warn!(frame = ?other, "unexpected frame from node"),
              Err(e) => error!("failed to parse frame: {e}"),
            },
            Some(Err(e)) => {
              error!("connection error: {e}");
              break;
            }
            None => {
              debug!("connection closed");
              break;
            }
          }
        }
      }
    }

    // Dropping the senders fails every outstanding call.
    pending.clear();
    debug!("multiplexer exited");
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn node_name(&self) -> &str {
    &self.node
  }

  async fn push(&self, frame: Frame) -> Result<(), IpcError> {
    self
      .outbound
      .send(frame)
      .await
      .map_err(|_| IpcError::Connection("multiplexer died".into()))
  }

  pub async fn send(&self, to: impl Into<Address>, msg: Term) -> Result<(), IpcError> {
    self.push(Frame::Send { to: to.into(), msg }).await
  }

  pub async fn cast(&self, to: impl Into<Address>, request: Term) -> Result<(), IpcError> {
    self.send(to, envelope::cast(request)).await
  }

  pub async fn call(&self, to: impl Into<Address>, request: Term, timeout: Duration) -> Result<Term, IpcError> {
    let id = self.counter.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    self.pending.insert(id, tx);

    if let Err(e) = self.send(to, envelope::call(self.pid, Term::Ref(id), request)).await {
      self.pending.remove(&id);
      return Err(e);
    }
    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(response)) => Ok(response),
      Ok(Err(_)) => Err(IpcError::Connection("connection closed".into())),
      Err(_) => {
        self.pending.remove(&id);
        Err(IpcError::Timeout)
      }
    }
  }

  pub async fn link(&self, to: Pid) -> Result<(), IpcError> {
    self.push(Frame::Link { to }).await
  }

  pub async fn unlink(&self, to: Pid) -> Result<(), IpcError> {
    self.push(Frame::Unlink { to }).await
  }

  pub async fn exit(&self, to: Pid, reason: Term) -> Result<(), IpcError> {
    self.push(Frame::Exit { to, reason }).await
  }

  /// Next message that was not a call reply, or `None` on timeout.
  pub async fn next_message(&mut self, timeout: Duration) -> Result<Option<Term>, IpcError> {
    match tokio::time::timeout(timeout, self.inbox.recv()).await {
      Ok(Some(msg)) => Ok(Some(msg)),
      Ok(None) => Err(IpcError::Connection("connection closed".into())),
      Err(_) => Ok(None),
    }
  }

  // --------------------------------------------------------------------------
  // Index protocol helpers
  // --------------------------------------------------------------------------

  /// Open `path` through the manager. The new index is linked to this client.
  pub async fn open_index(&self, path: &str, analyzer: Term) -> Result<Pid, IpcError> {
    let request = Term::tuple([
      Term::atom("open"),
      Term::Pid(self.pid),
      Term::binary(path),
      analyzer,
    ]);
    let response = self.call("main", request, CALL_TIMEOUT).await?;
    match response.as_tuple() {
      Some([ok, Term::Pid(pid)]) if ok.is_atom("ok") => Ok(*pid),
      _ => Err(IpcError::Rejected(response.to_string())),
    }
  }

  pub async fn version(&self) -> Result<String, IpcError> {
    let response = self.call("main", Term::atom("version"), CALL_TIMEOUT).await?;
    match response.as_tuple() {
      Some([ok, version]) if ok.is_atom("ok") => version
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IpcError::Protocol(response.to_string())),
      _ => Err(IpcError::Rejected(response.to_string())),
    }
  }

  /// Flush queued frames and close the connection.
  pub async fn close(self) {
    let Client { outbound, task, .. } = self;
    drop(outbound);
    if let Err(e) = task.await {
      warn!("multiplexer task failed: {e}");
    }
  }
}

fn route(msg: Term, pending: &DashMap<u64, oneshot::Sender<Term>>, inbox: &mpsc::UnboundedSender<Term>) {
  let tag = match msg.as_tuple() {
    Some([Term::Ref(id), _]) => Some(*id),
    _ => None,
  };
  if let Some(id) = tag
    && let Some((_, tx)) = pending.remove(&id)
  {
    if let Ok(response) = envelope::match_reply(msg, &Term::Ref(id)) {
      let _ = tx.send(response);
    }
    return;
  }
  let _ = inbox.send(msg);
}
