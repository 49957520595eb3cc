use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mailboard::config::Config;
use mailboard::error::TRANSIENT_MUTATION_MESSAGE;
use mailboard::mail::types::{ListPage, MutationKind, Scope};
use mailboard::sync::merge::{
  apply_view, merge_board, merge_linear, should_fetch_next, SortDirection, SortField, ViewFilter,
  ViewSort,
};
use mailboard::CachedMailClient;

#[derive(Parser, Debug)]
#[command(name = "mailboard")]
#[command(about = "Sync core for a Gmail-backed mail client, with a diagnostic CLI")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mailboard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List threads in a scope (inbox, board, or search:<query>)
  List {
    #[arg(default_value = "inbox")]
    scope: Scope,
    /// Only unread threads
    #[arg(long)]
    unread_only: bool,
    /// Only threads with attachments
    #[arg(long)]
    attachments: bool,
    /// Case-insensitive sender substring
    #[arg(long)]
    sender: Option<String>,
    /// Sort field: received or sender
    #[arg(long)]
    sort: Option<String>,
    /// Sort descending instead of ascending
    #[arg(long)]
    desc: bool,
  },
  /// Show the kanban board grouped by column
  Board,
  /// Show one thread in full
  Show { id: String },
  /// Show a scope's aggregate counts
  Summary {
    #[arg(default_value = "inbox")]
    scope: Scope,
  },
  /// Mark a thread read
  MarkRead { id: String },
  /// Mark a thread unread
  MarkUnread { id: String },
  /// Star a thread
  Star { id: String },
  /// Remove a thread's star
  Unstar { id: String },
  /// Move a thread to another board column
  Move { id: String, from: String, to: String },
  /// Delete a thread
  Delete { id: String },
  /// Cache diagnostics
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Entry counts per namespace
  Stats,
  /// Clear every namespace
  Clear,
}

fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::state_dir()
    .or_else(dirs::data_dir)
    .ok_or_else(|| eyre!("Could not determine state directory"))?
    .join("mailboard");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "mailboard.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

/// Fetch pages until the auto-pagination gate closes. The terminal shows
/// everything at once, so the sentinel counts as always visible.
async fn fetch_pages(
  client: &CachedMailClient,
  scope: &Scope,
  filter: &ViewFilter,
) -> Result<Vec<ListPage>> {
  let mut pages = Vec::new();
  let mut cursor: Option<String> = None;
  let mut consecutive_empty = 0u32;

  loop {
    let result = client.list_page(scope, cursor.as_deref()).await?;
    let page = result.value;

    if page.items.is_empty() {
      consecutive_empty += 1;
    } else {
      consecutive_empty = 0;
    }

    let next = page.next_cursor.clone();
    let has_more = page.has_more;
    pages.push(page);

    if !has_more || !should_fetch_next(true, filter, consecutive_empty) {
      break;
    }
    match next {
      Some(token) => cursor = Some(token),
      None => break,
    }
  }

  Ok(pages)
}

fn parse_sort(sort: Option<&str>, desc: bool) -> Result<Option<ViewSort>> {
  let field = match sort {
    None => return Ok(None),
    Some("received") => SortField::ReceivedAt,
    Some("sender") => SortField::Sender,
    Some(other) => return Err(eyre!("Unknown sort field '{}' (received, sender)", other)),
  };
  Ok(Some(ViewSort {
    field,
    direction: if desc {
      SortDirection::Descending
    } else {
      SortDirection::Ascending
    },
  }))
}

async fn mutate(client: &CachedMailClient, id: &str, kind: MutationKind) -> Result<()> {
  match client.mutate(id, kind).await {
    Ok(()) => {
      println!("ok");
      Ok(())
    }
    Err(_) => Err(eyre!("{}", TRANSIENT_MUTATION_MESSAGE)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let token = Config::get_api_token()?;
  let client = CachedMailClient::new(&config, token)?;

  match args.command {
    Command::List {
      scope,
      unread_only,
      attachments,
      sender,
      sort,
      desc,
    } => {
      let filter = ViewFilter {
        unread_only,
        has_attachment: attachments,
        sender,
      };
      let sort = parse_sort(sort.as_deref(), desc)?;

      let pages = fetch_pages(&client, &scope, &filter).await?;
      let merged = merge_linear(pages.iter().map(|p| p.items.as_slice()));
      let view = apply_view(&merged, &filter, sort);

      println!("{} ({} threads)", config.backend.account, view.len());
      for thread in view {
        println!(
          "{} {} {}  {:<24} {}",
          if thread.unread { "●" } else { " " },
          if thread.starred { "★" } else { " " },
          thread.received_at.format("%Y-%m-%d %H:%M"),
          thread.sender,
          thread.subject,
        );
      }
    }

    Command::Board => {
      let pages = fetch_pages(&client, &Scope::Board, &ViewFilter::default()).await?;
      let board = merge_board(pages.iter().map(|p| p.items.as_slice()));

      for column in &board.columns {
        println!("{} ({})", column.status, column.items.len());
        for thread in &column.items {
          println!(
            "  {} {:<24} {}",
            if thread.unread { "●" } else { " " },
            thread.sender,
            thread.subject
          );
        }
        println!();
      }
    }

    Command::Show { id } => {
      let result = client.get_thread(&id).await?;
      let thread = result.value;
      println!("From:     {}", thread.sender);
      println!("Subject:  {}", thread.subject);
      println!("Received: {}", thread.received_at.format("%Y-%m-%d %H:%M"));
      println!("Status:   {}", thread.status);
      if !thread.labels.is_empty() {
        println!("Labels:   {}", thread.labels.join(", "));
      }
      if let Some(summary) = &thread.summary {
        println!("Summary:  {}", summary);
      }
      println!();
      println!("{}", thread.body);
    }

    Command::Summary { scope } => {
      let result = client.scope_summary(&scope).await?;
      println!(
        "{}: {} threads, {} unread",
        result.value.scope_key, result.value.total, result.value.unread
      );
    }

    Command::MarkRead { id } => mutate(&client, &id, MutationKind::MarkRead).await?,
    Command::MarkUnread { id } => mutate(&client, &id, MutationKind::MarkUnread).await?,
    Command::Star { id } => mutate(&client, &id, MutationKind::Star).await?,
    Command::Unstar { id } => mutate(&client, &id, MutationKind::Unstar).await?,
    Command::Move { id, from, to } => {
      mutate(&client, &id, MutationKind::MoveColumn { from, to }).await?
    }
    Command::Delete { id } => mutate(&client, &id, MutationKind::Delete).await?,

    Command::Cache { action } => match action {
      CacheAction::Stats => {
        for (namespace, count) in client.cache_stats() {
          println!("{:<12} {}", namespace.as_str(), count);
        }
      }
      CacheAction::Clear => {
        client.invalidate_all();
        println!("cache cleared");
      }
    },
  }

  Ok(())
}
