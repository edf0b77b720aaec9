//! IndexActor E2E tests against real tantivy indexes.
//!
//! Checkpoint semantics, document mutation, partitioned search and teardown.

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
  };

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      IndexActor, IndexError,
      __tests__::helpers::{
        ActorTestContext, EngineProbe, TIMEOUT, call, commit, delete, fake_writer, fields, get_purge_seq,
        get_update_seq, ok_option, parse_hits, ram_query_parser, recv, search, search_text, set_purge_seq,
        set_update_seq, update, wait_for,
      },
      runtime,
    },
    engine::CommitData,
    ipc::{Pid, Term, envelope},
    node::ExitReason,
  };

  fn invalid_seq(seq: i64) -> Term {
    Term::error(Term::tuple([Term::atom("invalid_seq"), Term::Int(seq)]))
  }

  async fn wait_until_dead(ctx: &ActorTestContext, pid: Pid) -> bool {
    wait_for(TIMEOUT, || {
      let alive = ctx.node.is_alive(pid);
      async move { !alive }
    })
    .await
  }

  // ==========================================================================
  // Checkpoints
  // ==========================================================================

  #[tokio::test(flavor = "multi_thread")]
  async fn test_pending_seq_is_not_observable_until_commit() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "seqs").await;

    for seq in [1, 5, 9] {
      assert_eq!(set_update_seq(&mut probe, index, seq).await, Term::ok());
      assert_eq!(get_update_seq(&mut probe, index).await, 0);
    }

    commit(&mut probe, index).await;
    assert_eq!(get_update_seq(&mut probe, index).await, 9);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_purge_seq_follows_the_same_rules() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "purges").await;

    assert_eq!(set_purge_seq(&mut probe, index, 4).await, Term::ok());
    assert_eq!(get_purge_seq(&mut probe, index).await, 0);

    commit(&mut probe, index).await;
    assert_eq!(get_purge_seq(&mut probe, index).await, 4);
    assert_eq!(get_update_seq(&mut probe, index).await, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_seq_below_durable_is_rejected() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "seqs").await;

    set_update_seq(&mut probe, index, 10).await;
    set_purge_seq(&mut probe, index, 3).await;
    commit(&mut probe, index).await;

    assert_eq!(set_update_seq(&mut probe, index, 7).await, invalid_seq(7));
    assert_eq!(set_purge_seq(&mut probe, index, 2).await, invalid_seq(2));
    // Equal to the durable value is fine
    assert_eq!(set_update_seq(&mut probe, index, 10).await, Term::ok());

    let info = call(&mut probe, index, Term::atom("info")).await.unwrap();
    assert_eq!(ok_option(&info, "pending_seq"), Term::Int(10));
    assert_eq!(ok_option(&info, "committed_seq"), Term::Int(10));
    assert_eq!(ok_option(&info, "purge_seq"), Term::Int(3));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_commit_alias_stages_update_seq() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "alias").await;

    let response = call(&mut probe, index, Term::tuple([Term::atom("commit"), Term::Int(3)]))
      .await
      .unwrap();
    assert_eq!(response, Term::ok());
    assert_eq!(get_update_seq(&mut probe, index).await, 0);

    // The timer's info form commits too
    probe.send(index, Term::atom("commit"));
    assert_eq!(get_update_seq(&mut probe, index).await, 3);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_checkpoints_survive_reopen() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "durable").await;

    update(&mut probe, index, "a", fields(&[("name", "apple")])).await;
    set_update_seq(&mut probe, index, 12).await;
    set_purge_seq(&mut probe, index, 2).await;
    commit(&mut probe, index).await;
    // Staged but never committed
    set_update_seq(&mut probe, index, 20).await;
    update(&mut probe, index, "b", fields(&[("name", "banana")])).await;

    probe.cast(index, Term::atom("close"));
    assert_eq!(recv(&mut probe).await, ExitReason::Normal.notice(index));

    let index = ctx.open_ok(&mut probe, "durable").await;
    assert_eq!(get_update_seq(&mut probe, index).await, 12);
    assert_eq!(get_purge_seq(&mut probe, index).await, 2);
    let (total, ids) = search_text(&mut probe, index, "*:*").await;
    assert_eq!((total, ids), (1, vec!["a".to_string()]));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_commit_timer_commits_pending_values() {
    let ctx = ActorTestContext::with_config(|config| config.index.commit_interval_secs = 1);
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "timed").await;

    set_update_seq(&mut probe, index, 6).await;

    let mut committed = 0;
    for _ in 0..50 {
      committed = get_update_seq(&mut probe, index).await;
      if committed == 6 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(committed, 6);
  }

  // ==========================================================================
  // Documents
  // ==========================================================================

  #[tokio::test(flavor = "multi_thread")]
  async fn test_delete_of_missing_id_changes_nothing() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;
    update(&mut probe, index, "1", fields(&[("name", "apple")])).await;
    set_update_seq(&mut probe, index, 1).await;
    commit(&mut probe, index).await;

    assert_eq!(delete(&mut probe, index, "nope").await, Term::ok());
    set_update_seq(&mut probe, index, 2).await;
    commit(&mut probe, index).await;

    let (total, ids) = search_text(&mut probe, index, "*:*").await;
    assert_eq!((total, ids), (1, vec!["1".to_string()]));
    let info = call(&mut probe, index, Term::atom("info")).await.unwrap();
    assert_eq!(ok_option(&info, "doc_count"), Term::Int(1));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_update_replaces_previous_version() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    update(&mut probe, index, "1", fields(&[("name", "apple")])).await;
    update(&mut probe, index, "1", fields(&[("name", "cherry")])).await;
    set_update_seq(&mut probe, index, 2).await;
    commit(&mut probe, index).await;

    let request = Term::tuple([Term::atom("search"), Term::list([Term::pair("query", Term::binary("*:*"))])]);
    let response = call(&mut probe, index, request).await.unwrap();
    let (total, ids) = parse_hits(&response);
    assert_eq!((total, ids), (1, vec!["1".to_string()]));

    let hits = ok_option(&response, "hits");
    let [_, _, stored] = hits.as_list().unwrap()[0].as_tuple().unwrap() else {
      panic!("malformed hit in {response}");
    };
    assert_eq!(stored.option("name"), Some(&Term::binary("cherry")));

    assert_eq!(search_text(&mut probe, index, "apple").await.0, 0);
    assert_eq!(search_text(&mut probe, index, "name:cherry").await.0, 1);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_invalid_document_is_reported_and_actor_continues() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    let response = update(&mut probe, index, "1", fields(&[("_id", "sneaky")])).await;
    assert!(
      matches!(response.as_tuple(), Some([error, _]) if error.is_atom("error")),
      "unexpected {response}"
    );

    assert!(ctx.node.is_alive(index));
    assert_eq!(update(&mut probe, index, "1", fields(&[("name", "apple")])).await, Term::ok());
  }

  // ==========================================================================
  // Search
  // ==========================================================================

  async fn partitioned_index(ctx: &ActorTestContext, probe: &mut crate::node::Mailbox) -> Pid {
    let index = ctx.open_ok(probe, "parts").await;
    let docs = [
      ("p1:a", "p1", "apple"),
      ("p1:b", "p1", "banana"),
      ("p2:a", "p2", "apple"),
      ("p3:c", "p3", "cherry"),
    ];
    for (id, partition, name) in docs {
      let fields = fields(&[("_partition", partition), ("name", name)]);
      assert_eq!(update(probe, index, id, fields).await, Term::ok());
    }
    set_update_seq(probe, index, docs.len() as i64).await;
    commit(probe, index).await;
    index
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_partition_confines_every_query() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = partitioned_index(&ctx, &mut probe).await;

    for query in ["*:*", "apple", "name:apple", "_partition:p2", "cherry OR banana", "_id:p2"] {
      let options = vec![
        Term::pair("query", Term::binary(query)),
        Term::pair("partition", Term::binary("p1")),
      ];
      let (_, ids) = search(&mut probe, index, options).await;
      for id in &ids {
        assert!(id.starts_with("p1:"), "{query:?} leaked {id} out of p1");
      }
    }

    let options = vec![
      Term::pair("query", Term::binary("apple")),
      Term::pair("partition", Term::binary("p1")),
    ];
    let (total, ids) = search(&mut probe, index, options).await;
    assert_eq!((total, ids), (1, vec!["p1:a".to_string()]));

    let (total, _) = search_text(&mut probe, index, "apple").await;
    assert_eq!(total, 2);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_search_limit_and_count() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = partitioned_index(&ctx, &mut probe).await;

    let (total, ids) = search(&mut probe, index, vec![Term::pair("limit", Term::Int(2))]).await;
    assert_eq!(total, 4);
    assert_eq!(ids.len(), 2);

    let (total, ids) = search(&mut probe, index, vec![Term::pair("limit", Term::Int(0))]).await;
    assert_eq!(total, 4);
    assert!(ids.is_empty());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_search_with_huge_limit_returns_everything() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = partitioned_index(&ctx, &mut probe).await;

    let (total, ids) = search(&mut probe, index, vec![Term::pair("limit", Term::Int(i64::MAX))]).await;
    assert_eq!(total, 4);
    assert_eq!(ids.len(), 4);

    assert!(ctx.node.is_alive(index));
    assert_eq!(get_update_seq(&mut probe, index).await, 4);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_read_view_moves_after_commit() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    update(&mut probe, index, "1", fields(&[("name", "apple")])).await;
    assert_eq!(search_text(&mut probe, index, "apple").await.0, 0);

    set_update_seq(&mut probe, index, 1).await;
    commit(&mut probe, index).await;

    let stale = vec![
      Term::pair("query", Term::binary("apple")),
      Term::pair("refresh", Term::atom("false")),
    ];
    assert_eq!(search(&mut probe, index, stale).await.0, 0);
    assert_eq!(search_text(&mut probe, index, "apple").await.0, 1);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_query_parse_error_is_reported() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    let request = Term::tuple([
      Term::atom("search"),
      Term::list([Term::pair("query", Term::binary("name:(apple"))]),
    ]);
    let response = call(&mut probe, index, request).await.unwrap();

    let Some([error, reason]) = response.as_tuple() else {
      panic!("unexpected {response}");
    };
    assert!(error.is_atom("error"));
    assert!(
      matches!(reason.as_tuple(), Some([tag, _]) if tag.is_atom("query_parse_error")),
      "unexpected {response}"
    );
    assert!(ctx.node.is_alive(index));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_malformed_requests_get_invalid_msg() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    let requests = [
      Term::atom("frobnicate"),
      Term::tuple([Term::atom("set_update_seq"), Term::binary("7")]),
      Term::tuple([Term::atom("delete"), Term::Int(1)]),
      Term::tuple([Term::atom("search"), Term::list([Term::pair("limit", Term::binary("ten"))])]),
    ];
    for request in requests {
      let response = call(&mut probe, index, request).await.unwrap();
      assert_eq!(response, envelope::invalid_msg());
    }
    assert!(ctx.node.is_alive(index));
  }

  // ==========================================================================
  // Scenario
  // ==========================================================================

  #[tokio::test(flavor = "multi_thread")]
  async fn test_fruits_scenario() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    assert_eq!(update(&mut probe, index, "1", fields(&[("name", "apple")])).await, Term::ok());
    assert_eq!(update(&mut probe, index, "2", fields(&[("name", "banana")])).await, Term::ok());
    assert_eq!(get_update_seq(&mut probe, index).await, 0);

    assert_eq!(delete(&mut probe, index, "1").await, Term::ok());
    set_update_seq(&mut probe, index, 2).await;
    commit(&mut probe, index).await;

    assert_eq!(get_update_seq(&mut probe, index).await, 2);
    let (total, ids) = search_text(&mut probe, index, "*:*").await;
    assert_eq!((total, ids), (1, vec!["2".to_string()]));
  }

  // ==========================================================================
  // Teardown
  // ==========================================================================

  #[tokio::test(flavor = "multi_thread")]
  async fn test_peer_death_closes_index() {
    let ctx = ActorTestContext::new();
    let mut opener = ctx.probe();
    let index = ctx.open_ok(&mut opener, "fruits").await;
    update(&mut opener, index, "1", fields(&[("name", "apple")])).await;

    drop(opener);

    assert!(wait_until_dead(&ctx, index).await, "index outlived its peer");
    // The writer and its lock are gone, so the path opens again.
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;
    assert_eq!(search_text(&mut probe, index, "*:*").await.0, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_close_cast_stops_with_normal() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;

    probe.cast(index, Term::atom("close"));

    assert_eq!(recv(&mut probe).await, ExitReason::Normal.notice(index));
    assert!(!ctx.node.is_alive(index));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_idle_index_closes_itself() {
    let ctx = ActorTestContext::with_config(|config| {
      config.index.close_if_idle = true;
      config.index.idle_check_interval_secs = 1;
    });
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "sleepy").await;

    let notice = tokio::time::timeout(Duration::from_secs(5), probe.recv())
      .await
      .expect("idle close before timeout")
      .expect("probe open");
    assert_eq!(notice, ExitReason::Normal.notice(index));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_info_reports_counts() {
    let ctx = ActorTestContext::new();
    let mut probe = ctx.probe();
    let index = ctx.open_ok(&mut probe, "fruits").await;
    update(&mut probe, index, "1", fields(&[("name", "apple")])).await;
    update(&mut probe, index, "2", fields(&[("name", "banana")])).await;
    set_update_seq(&mut probe, index, 2).await;
    commit(&mut probe, index).await;
    set_update_seq(&mut probe, index, 5).await;

    let info = call(&mut probe, index, Term::atom("info")).await.unwrap();

    assert_eq!(ok_option(&info, "doc_count"), Term::Int(2));
    assert_eq!(ok_option(&info, "pending_seq"), Term::Int(5));
    assert_eq!(ok_option(&info, "committed_seq"), Term::Int(2));
    assert!(ok_option(&info, "disk_size").as_i64().unwrap() > 0);
  }

  // ==========================================================================
  // Construction and terminate with a fake engine
  // ==========================================================================

  #[tokio::test(flavor = "multi_thread")]
  async fn test_builder_requires_every_dependency() {
    let ctx = ActorTestContext::new();
    let engine = Arc::new(EngineProbe::default());
    let before = ctx.node.mailbox_count();

    let missing = |result: Result<IndexActor, IndexError>| match result {
      Err(IndexError::MissingDependency(name)) => name,
      Err(e) => panic!("unexpected error {e}"),
      Ok(_) => panic!("built without a dependency"),
    };

    assert_eq!(missing(IndexActor::builder().name("x").build()), "state");
    assert_eq!(
      missing(IndexActor::builder().state(Arc::clone(&ctx.state)).build()),
      "name"
    );
    assert_eq!(
      missing(
        IndexActor::builder()
          .state(Arc::clone(&ctx.state))
          .name("x")
          .query_parser(ram_query_parser())
          .build()
      ),
      "writer"
    );
    assert_eq!(
      missing(
        IndexActor::builder()
          .state(Arc::clone(&ctx.state))
          .name("x")
          .writer(fake_writer(&engine))
          .build()
      ),
      "query_parser"
    );

    assert!(engine.writer_closed(), "writer of a failed build must be closed");
    assert_eq!(ctx.node.mailbox_count(), before);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_builder_loads_durable_checkpoints() {
    let ctx = ActorTestContext::new();
    let engine = Arc::new(EngineProbe::default());
    let mut writer = fake_writer(&engine);
    writer.data = CommitData {
      update_seq: 40,
      purge_seq: 3,
    };

    let actor = IndexActor::builder()
      .state(Arc::clone(&ctx.state))
      .name("loaded")
      .writer(writer)
      .query_parser(ram_query_parser())
      .build()
      .unwrap();
    let index = runtime::spawn(&ctx.node, actor).unwrap();
    let mut probe = ctx.probe();

    assert_eq!(get_update_seq(&mut probe, index).await, 40);
    assert_eq!(get_purge_seq(&mut probe, index).await, 3);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_terminate_closes_both_even_when_one_fails() {
    let ctx = ActorTestContext::new();
    let engine = Arc::new(EngineProbe::default());
    engine.fail_searcher_close.store(true, Ordering::SeqCst);
    engine.fail_writer_close.store(true, Ordering::SeqCst);

    let actor = IndexActor::builder()
      .state(Arc::clone(&ctx.state))
      .name("fragile")
      .writer(fake_writer(&engine))
      .query_parser(ram_query_parser())
      .build()
      .unwrap();
    let index = runtime::spawn(&ctx.node, actor).unwrap();

    let killer = ctx.node.create_mailbox();
    ctx.node.exit(killer.pid(), index, ExitReason::Shutdown);

    assert!(wait_until_dead(&ctx, index).await);
    assert!(engine.searcher_closed());
    assert!(engine.writer_closed());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_discard_releases_unstarted_actor() {
    let ctx = ActorTestContext::new();
    let engine = Arc::new(EngineProbe::default());

    let actor = IndexActor::builder()
      .state(Arc::clone(&ctx.state))
      .name("never-started")
      .writer(fake_writer(&engine))
      .query_parser(ram_query_parser())
      .build()
      .unwrap();
    assert_eq!(actor.name(), "never-started");
    actor.discard();

    assert!(engine.searcher_closed());
    assert!(engine.writer_closed());
  }
}
