//! Dispatch loop tests: envelope classification, replies, links and exits.

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, Mutex},
    time::Duration,
  };

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{TIMEOUT, TestNode, recv, wait_for},
      runtime::{self, Actor, ActorError, CallReply, Context},
    },
    ipc::{Caller, Pid, Term, envelope},
    node::{ExitReason, Mailbox, Node},
  };

  /// Records every cast and info it sees and how it terminated.
  #[derive(Default)]
  struct Recorder {
    seen: Vec<Term>,
    deferred: Option<Caller>,
    tick: Option<Duration>,
    fail_init: bool,
    terminated: Arc<Mutex<Option<ExitReason>>>,
  }

  impl Actor for Recorder {
    fn init(&mut self, ctx: &mut Context) -> Result<(), ActorError> {
      if self.fail_init {
        return Err(ActorError::Failed("init refused".into()));
      }
      if let Some(period) = self.tick {
        ctx.send_interval(period, Term::atom("tick"));
      }
      Ok(())
    }

    fn handle_call(&mut self, ctx: &mut Context, from: &Caller, request: Term) -> Result<CallReply, ActorError> {
      match request.as_atom() {
        Some("seen") => Ok(CallReply::Reply(Term::List(self.seen.clone()))),
        Some("fail") => Err(ActorError::Failed("boom".into())),
        Some("panic") => panic!("kaboom"),
        Some("thread") => Ok(CallReply::Reply(Term::binary(
          std::thread::current().name().unwrap_or_default(),
        ))),
        Some("defer") => {
          self.deferred = Some(from.clone());
          Ok(CallReply::NoReply)
        }
        Some("release") => {
          if let Some(caller) = self.deferred.take() {
            ctx.reply(&caller, Term::atom("released"));
          }
          Ok(CallReply::Reply(Term::ok()))
        }
        _ => Ok(CallReply::Unhandled),
      }
    }

    fn handle_cast(&mut self, ctx: &mut Context, request: Term) -> Result<(), ActorError> {
      if request.is_atom("stop") {
        ctx.exit(ExitReason::Normal);
      } else if request.is_atom("panic") {
        panic!("cast kaboom");
      } else {
        self.seen.push(Term::tuple([Term::atom("cast"), request]));
      }
      Ok(())
    }

    fn handle_info(&mut self, _ctx: &mut Context, msg: Term) -> Result<(), ActorError> {
      self.seen.push(Term::tuple([Term::atom("info"), msg]));
      Ok(())
    }

    fn terminate(&mut self, _ctx: &mut Context, reason: &ExitReason) {
      *self.terminated.lock().unwrap() = Some(reason.clone());
    }
  }

  /// Start `actor` linked to a fresh trapping probe.
  fn start_linked(node: &Arc<Node>, actor: Recorder) -> (Mailbox, Pid) {
    let probe = node.create_mailbox();
    probe.trap_exits(true);
    let mailbox = node.create_mailbox();
    node.link(probe.pid(), mailbox.pid()).unwrap();
    let pid = runtime::start(actor, mailbox).unwrap();
    (probe, pid)
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_casts_and_infos_dispatch_in_mailbox_order() {
    let node = TestNode::new();
    let (mut probe, pid) = start_linked(&node, Recorder::default());

    probe.cast(pid, Term::atom("a"));
    probe.send(pid, Term::atom("b"));
    // A call envelope without a {Pid, Tag} pair is just an info
    let malformed = Term::tuple([Term::atom("$gen_call"), Term::atom("nobody"), Term::atom("c")]);
    probe.send(pid, malformed.clone());

    let seen = probe.call(pid, Term::atom("seen"), TIMEOUT).await.unwrap();
    assert_eq!(
      seen,
      Term::list([
        Term::tuple([Term::atom("cast"), Term::atom("a")]),
        Term::tuple([Term::atom("info"), Term::atom("b")]),
        Term::tuple([Term::atom("info"), malformed]),
      ])
    );
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_unhandled_call_gets_invalid_msg_and_actor_survives() {
    let node = TestNode::new();
    let (mut probe, pid) = start_linked(&node, Recorder::default());

    let response = probe.call(pid, Term::atom("bogus"), TIMEOUT).await.unwrap();
    assert_eq!(response, envelope::invalid_msg());

    let response = probe.call(pid, Term::atom("seen"), TIMEOUT).await.unwrap();
    assert_eq!(response, Term::List(vec![]));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_handler_error_replies_then_stops() {
    let node = TestNode::new();
    let terminated = Arc::new(Mutex::new(None));
    let actor = Recorder {
      terminated: Arc::clone(&terminated),
      ..Default::default()
    };
    let (mut probe, pid) = start_linked(&node, actor);

    let response = probe.call(pid, Term::atom("fail"), TIMEOUT).await.unwrap();
    assert_eq!(response, Term::error(Term::binary("boom")));

    let notice = recv(&mut probe).await;
    assert_eq!(notice, ExitReason::Error("boom".into()).notice(pid));
    assert!(!node.is_alive(pid));
    assert_eq!(*terminated.lock().unwrap(), Some(ExitReason::Error("boom".into())));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_panicking_call_replies_error_and_terminates() {
    let node = TestNode::new();
    let terminated = Arc::new(Mutex::new(None));
    let actor = Recorder {
      terminated: Arc::clone(&terminated),
      ..Default::default()
    };
    let (mut probe, pid) = start_linked(&node, actor);

    let reason = ExitReason::Error("handler panicked: kaboom".into());
    let response = probe.call(pid, Term::atom("panic"), TIMEOUT).await.unwrap();
    assert_eq!(response, Term::error(Term::binary("handler panicked: kaboom")));

    assert_eq!(recv(&mut probe).await, reason.notice(pid));
    assert!(!node.is_alive(pid));
    assert_eq!(*terminated.lock().unwrap(), Some(reason));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_panicking_cast_stops_with_error() {
    let node = TestNode::new();
    let terminated = Arc::new(Mutex::new(None));
    let actor = Recorder {
      terminated: Arc::clone(&terminated),
      ..Default::default()
    };
    let (mut probe, pid) = start_linked(&node, actor);

    probe.cast(pid, Term::atom("panic"));

    let reason = ExitReason::Error("handler panicked: cast kaboom".into());
    assert_eq!(recv(&mut probe).await, reason.notice(pid));
    assert_eq!(*terminated.lock().unwrap(), Some(reason));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_dispatch_runs_on_named_actor_thread() {
    let node = TestNode::new();
    let (mut probe, pid) = start_linked(&node, Recorder::default());

    let response = probe.call(pid, Term::atom("thread"), TIMEOUT).await.unwrap();
    assert_eq!(response, Term::binary(format!("actor-{}", pid.id())));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_linked_peer_death_runs_terminate() {
    let node = TestNode::new();
    let terminated = Arc::new(Mutex::new(None));
    let actor = Recorder {
      terminated: Arc::clone(&terminated),
      ..Default::default()
    };
    let pid = runtime::spawn(&node, actor).unwrap();

    let peer = node.create_mailbox();
    node.link(peer.pid(), pid).unwrap();
    peer.close(ExitReason::NoConnection);

    assert!(
      wait_for(TIMEOUT, || {
        let alive = node.is_alive(pid);
        async move { !alive }
      })
      .await
    );
    assert_eq!(*terminated.lock().unwrap(), Some(ExitReason::NoConnection));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_exit_from_handler_stops_with_reason() {
    let node = TestNode::new();
    let (mut probe, pid) = start_linked(&node, Recorder::default());

    probe.cast(pid, Term::atom("stop"));

    assert_eq!(recv(&mut probe).await, ExitReason::Normal.notice(pid));
    assert!(!node.is_alive(pid));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_init_failure_stops_actor() {
    let node = TestNode::new();
    let terminated = Arc::new(Mutex::new(None));
    let actor = Recorder {
      fail_init: true,
      terminated: Arc::clone(&terminated),
      ..Default::default()
    };
    let (mut probe, pid) = start_linked(&node, actor);

    let reason = ExitReason::Error("init refused".into());
    assert_eq!(recv(&mut probe).await, reason.notice(pid));
    assert_eq!(*terminated.lock().unwrap(), Some(reason));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_deferred_reply_from_another_handler() {
    let node = TestNode::new();
    let (mut probe, pid) = start_linked(&node, Recorder::default());

    let mut waiter = node.create_mailbox();
    let tag = Term::Ref(77);
    waiter.send(pid, envelope::call(waiter.pid(), tag.clone(), Term::atom("defer")));

    let response = probe.call(pid, Term::atom("release"), TIMEOUT).await.unwrap();
    assert_eq!(response, Term::ok());

    assert_eq!(recv(&mut waiter).await, envelope::reply(&tag, Term::atom("released")));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_send_interval_posts_until_actor_is_gone() {
    let node = TestNode::new();
    let actor = Recorder {
      tick: Some(Duration::from_millis(20)),
      ..Default::default()
    };
    let (mut probe, pid) = start_linked(&node, actor);

    let mut ticks = 0;
    for _ in 0..100 {
      let seen = probe.call(pid, Term::atom("seen"), TIMEOUT).await.unwrap();
      ticks = seen.as_list().map_or(0, <[Term]>::len);
      if ticks >= 2 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ticks >= 2, "expected at least two ticks, saw {ticks}");

    probe.cast(pid, Term::atom("stop"));
    assert_eq!(recv(&mut probe).await, ExitReason::Normal.notice(pid));
  }
}
