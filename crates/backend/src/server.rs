//! Socket gateway: one node mailbox per Unix socket connection.
//!
//! Each connection gets a trapping mailbox, so exit signals from indexes it
//! linked arrive as `{'EXIT', Pid, Reason}` deliveries instead of killing
//! the connection. When the client goes away the mailbox closes with
//! `noconnection`, which terminates every index linked to it.
//!
//! # Lifecycle
//!
//! 1. `Server::run()` binds the socket and accepts connections
//! 2. Each connection spawns a `handle_connection` task
//! 3. On cancellation, connections close with `shutdown` and the socket file is removed

use std::{path::PathBuf, sync::Arc};

use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::{
  codec::{Framed, LinesCodec},
  sync::CancellationToken,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
  ipc::{Address, Envelope, Frame, IpcError, Pid, Term},
  node::{ExitReason, Node},
};

type FrameSink = SplitSink<Framed<UnixStream, LinesCodec>, String>;

pub struct Server {
  socket_path: PathBuf,
  node: Arc<Node>,
}

impl Server {
  pub fn new(socket_path: PathBuf, node: Arc<Node>) -> Self {
    Self { socket_path, node }
  }

  /// Run the server until the cancellation token is triggered.
  pub async fn run(&self, cancel: CancellationToken) -> Result<(), IpcError> {
    // Remove stale socket file
    if self.socket_path.exists() {
      tokio::fs::remove_file(&self.socket_path).await?;
    }

    if let Some(parent) = self.socket_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let listener = UnixListener::bind(&self.socket_path)?;
    info!("Server listening on {:?}", self.socket_path);

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Server shutting down (cancelled)");
          break;
        }

        result = listener.accept() => {
          match result {
            Ok((stream, _)) => {
              let node = Arc::clone(&self.node);
              let cancel = cancel.child_token();
              tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, node, cancel).await {
                  warn!(error = %e, "Connection ended with error");
                }
              });
            }
            Err(e) => {
              error!("Accept error: {}", e);
            }
          }
        }
      }
    }

    if self.socket_path.exists() {
      tokio::fs::remove_file(&self.socket_path).await?;
    }

    Ok(())
  }
}

// ============================================================================
// Connection Handler
// ============================================================================

async fn send_frame(sink: &mut FrameSink, frame: &Frame) -> Result<(), IpcError> {
  let json = serde_json::to_string(frame)?;
  sink.send(json).await?;
  Ok(())
}

async fn handle_connection(stream: UnixStream, node: Arc<Node>, cancel: CancellationToken) -> Result<(), IpcError> {
  let mut mailbox = node.create_mailbox();
  mailbox.trap_exits(true);
  let pid = mailbox.pid();
  debug!(%pid, "Client connected");

  let framed = Framed::new(stream, LinesCodec::new());
  let (mut sink, mut stream) = framed.split();

  let welcome = Frame::Welcome {
    pid,
    node: node.name().to_string(),
  };
  if let Err(e) = send_frame(&mut sink, &welcome).await {
    mailbox.close(ExitReason::NoConnection);
    return Err(e);
  }

  let reason = loop {
    tokio::select! {
      _ = cancel.cancelled() => break ExitReason::Shutdown,

      msg = mailbox.recv() => match msg {
        Ok(msg) => {
          if let Err(e) = send_frame(&mut sink, &Frame::Deliver { msg }).await {
            warn!(%pid, error = %e, "Failed to deliver to client");
            break ExitReason::NoConnection;
          }
        }
        Err(reason) => break reason,
      },

      line = stream.next() => match line {
        Some(Ok(line)) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          match serde_json::from_str::<Frame>(trimmed) {
            Ok(frame) => handle_frame(&node, pid, frame),
            Err(e) => warn!(%pid, "Invalid frame JSON: {}", e),
          }
        }
        Some(Err(e)) => {
          warn!(%pid, error = %e, "Error reading from client");
          break ExitReason::NoConnection;
        }
        None => break ExitReason::NoConnection,
      },
    }
  };

  debug!(%pid, %reason, "Client disconnected");
  mailbox.close(reason);
  Ok(())
}

/// Apply one client frame on behalf of the connection mailbox `pid`.
fn handle_frame(node: &Node, pid: Pid, frame: Frame) {
  trace!(%pid, ?frame, "Frame received");
  match frame {
    Frame::Send { to, msg } => {
      let target = match &to {
        Address::Pid(target) => Some(*target).filter(|target| node.is_alive(*target)),
        Address::Name(name) => node.whereis(name),
      };
      match target {
        Some(target) => {
          node.send(target, msg);
        }
        None => undeliverable(node, &to, msg),
      }
    }
    Frame::Link { to } => {
      if node.link(pid, to).is_err() {
        node.send(pid, ExitReason::NoProc.notice(to));
      }
    }
    Frame::Unlink { to } => node.unlink(pid, to),
    Frame::Exit { to, reason } => node.exit(pid, to, ExitReason::from_term(reason)),
    Frame::Welcome { .. } | Frame::Deliver { .. } => {
      warn!(%pid, "Ignoring server-only frame from client");
    }
  }
}

/// A call to a missing process is answered with `{error, noproc}` so the
/// caller does not wait for its timeout; anything else is dropped.
fn undeliverable(node: &Node, to: &Address, msg: Term) {
  debug!(?to, "Dropping message for missing process");
  if let Envelope::Call { from, .. } = Envelope::classify(msg) {
    node.reply(&from, Term::error(Term::atom("noproc")));
  }
}
