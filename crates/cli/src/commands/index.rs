//! One-shot index commands: each opens the index, runs a single request and
//! disconnects, which closes the index again on the node.

use std::path::Path;

use anyhow::{Context, Result, bail};
use sleuth::{
  Daemon,
  config::Config,
  engine::{json_to_term, term_to_json},
  ipc::{Client, Pid, Term, client::CALL_TIMEOUT},
};
use tracing::debug;

/// Connection target shared by every index command
pub struct Target<'a> {
  pub config_path: Option<&'a Path>,
  pub path: &'a str,
  pub analyzer: &'a str,
}

impl Target<'_> {
  async fn open(&self) -> Result<(Client, Pid)> {
    let config = match self.config_path {
      Some(path) => Config::load_from(path)?,
      None => Config::load()?,
    };
    let socket_path = config.socket_path();
    let client = Daemon::connect_or_start(&socket_path, self.config_path)
      .await
      .context("Failed to connect to daemon")?;

    let index = client
      .open_index(self.path, Term::binary(self.analyzer))
      .await
      .with_context(|| format!("Failed to open index {}", self.path))?;
    debug!(%index, path = self.path, "Opened index");
    Ok((client, index))
  }
}

fn request(command: &str, args: impl IntoIterator<Item = Term>) -> Term {
  let mut items = vec![Term::atom(command)];
  items.extend(args);
  Term::Tuple(items)
}

fn print_json(term: &Term) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(&term_to_json(term))?);
  Ok(())
}

/// Fail on `{error, Reason}`, pass anything else through.
fn check(response: Term) -> Result<Term> {
  if let Some([tag, reason]) = response.as_tuple()
    && tag.is_atom("error")
  {
    bail!("{reason}");
  }
  Ok(response)
}

/// Stage `seq`, commit it and read back the committed value.
///
/// The commit is a cast; the follow-up call is queued behind it, so it only
/// returns once the commit has run.
async fn commit_seq(client: &Client, index: Pid, seq: i64) -> Result<Term> {
  check(client.call(index, request("set_update_seq", [Term::Int(seq)]), CALL_TIMEOUT).await?)?;
  client.cast(index, Term::atom("commit")).await?;
  check(client.call(index, Term::atom("get_update_seq"), CALL_TIMEOUT).await?)
}

/// Committed update sequence of `index`
async fn update_seq(client: &Client, index: Pid) -> Result<i64> {
  let response = check(client.call(index, Term::atom("get_update_seq"), CALL_TIMEOUT).await?)?;
  match response.as_tuple() {
    Some([_, seq]) => seq
      .as_i64()
      .with_context(|| format!("Unexpected update sequence: {response}")),
    _ => bail!("Unexpected update sequence: {response}"),
  }
}

/// Run a document change and commit it.
///
/// Disconnecting drops uncommitted work, so every change is committed before
/// the command returns. Without `seq` the next sequence after the committed
/// one is used; an explicit `seq` must move past it or the commit would be a
/// no-op.
async fn apply(client: &Client, index: Pid, change: Term, seq: Option<i64>) -> Result<Term> {
  let committed = update_seq(client, index).await?;
  let seq = match seq {
    Some(seq) => seq,
    None => committed.checked_add(1).context("Update sequence exhausted")?,
  };
  if seq <= committed {
    bail!("Sequence {seq} must be greater than the committed sequence {committed}");
  }

  check(client.call(index, change, CALL_TIMEOUT).await?)?;
  commit_seq(client, index, seq).await
}

/// Search an index and print the hits as JSON
pub async fn cmd_search(target: Target<'_>, query: &str, limit: Option<i64>, partition: Option<&str>) -> Result<()> {
  let (client, index) = target.open().await?;

  let mut options = vec![Term::pair("query", Term::binary(query))];
  if let Some(limit) = limit {
    options.push(Term::pair("limit", Term::Int(limit)));
  }
  if let Some(partition) = partition {
    options.push(Term::pair("partition", Term::binary(partition)));
  }

  let result = client.call(index, request("search", [Term::List(options)]), CALL_TIMEOUT).await;
  client.close().await;

  let response = check(result?)?;
  match response.as_tuple() {
    Some([_, props]) => print_json(props),
    _ => print_json(&response),
  }
}

/// Add or replace one document. `fields` is a JSON object of field name to value.
pub async fn cmd_update(target: Target<'_>, id: &str, fields: &str, seq: Option<i64>) -> Result<()> {
  let fields: serde_json::Value = serde_json::from_str(fields).context("Fields must be valid JSON")?;
  if !fields.is_object() {
    bail!("Fields must be a JSON object");
  }

  let (client, index) = target.open().await?;
  let update = request("update", [Term::binary(id), json_to_term(&fields)]);
  let result = apply(&client, index, update, seq).await;
  client.close().await;

  print_json(&result?)
}

/// Delete one document by id
pub async fn cmd_delete(target: Target<'_>, id: &str, seq: Option<i64>) -> Result<()> {
  let (client, index) = target.open().await?;
  let result = apply(&client, index, request("delete", [Term::binary(id)]), seq).await;
  client.close().await;

  print_json(&result?)
}

/// Print document counts and committed checkpoints
pub async fn cmd_info(target: Target<'_>) -> Result<()> {
  let (client, index) = target.open().await?;
  let result = client.call(index, Term::atom("info"), CALL_TIMEOUT).await;
  client.close().await;

  let response = check(result?)?;
  match response.as_tuple() {
    Some([_, props]) => print_json(props),
    _ => print_json(&response),
  }
}

/// Print the daemon version, starting it if needed
pub async fn cmd_version(config_path: Option<&Path>) -> Result<()> {
  let config = match config_path {
    Some(path) => Config::load_from(path)?,
    None => Config::load()?,
  };
  let client = Daemon::connect_or_start(&config.socket_path(), config_path)
    .await
    .context("Failed to connect to daemon")?;
  let version = client.version().await;
  let node = client.node_name().to_string();
  client.close().await;

  println!("cli {}", env!("CARGO_PKG_VERSION"));
  println!("{node} {}", version?);
  Ok(())
}
