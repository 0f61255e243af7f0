//! Headless chat client.
//!
//! Drives the same shell and conversation screen a UI would, printing the
//! cached views instead of rendering them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chatty_client::screens::{conversation_rows, MessagesScreen};
use chatty_client::{Action, AppShell, AuthUser, ClientConfig, ClientContext, NavAction, Route, WsTransport};
use chatty_common::{GroupId, UserId};

#[derive(Parser)]
#[command(name = "chatty", about = "Headless chat client")]
struct Cli {
    /// WebSocket URL of the chat backend.
    #[arg(long)]
    endpoint: Option<String>,

    /// Signed-in user id.
    #[arg(long, default_value_t = 1)]
    user: i64,

    /// Messages per page.
    #[arg(long, default_value_t = 10)]
    page_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List conversations with their newest message.
    List,
    /// Print a conversation, optionally fetching older pages.
    Read {
        group: i64,
        #[arg(long, default_value_t = 0)]
        more: usize,
    },
    /// Send a message to a conversation.
    Send { group: i64, text: String },
    /// Follow the conversation list until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::default().with_user(UserId(cli.user)).with_page_size(cli.page_size);
    if let Some(endpoint) = cli.endpoint {
        config = config.with_endpoint(endpoint);
    }

    let transport = Arc::new(
        WsTransport::connect(&config)
            .await
            .with_context(|| format!("failed to connect to {}", config.endpoint))?,
    );
    let ctx = ClientContext::new(config.clone(), transport.clone(), transport.clone());

    let Some(me) = ctx.fetch_user(config.user_id).await? else {
        bail!("no such user {}", config.user_id);
    };
    ctx.store.dispatch(Action::LoggedIn(AuthUser { id: me.id, username: me.username.clone() }));

    match cli.command {
        Command::List => print_conversations(&ctx),
        Command::Read { group, more } => {
            let screen = open(&ctx, GroupId(group)).await?;
            for _ in 0..more {
                if screen.load_more().await? == 0 {
                    break;
                }
            }
            print_conversation(&screen);
        }
        Command::Send { group, text } => {
            let screen = open(&ctx, GroupId(group)).await?;
            let sent = screen.send(&text).await?;
            println!("sent {} at {}", sent.id, sent.created_at.format("%H:%M:%S"));
        }
        Command::Watch => {
            let mut shell = AppShell::new(ctx.clone());
            shell.sync().await?;
            print_conversations(&ctx);
            let mut changes = ctx.cache.changes();
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        shell.sync().await?;
                        print_conversations(&ctx);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    transport.close();
    // Give the socket a moment to send its close frame.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

async fn open(ctx: &ClientContext, group: GroupId) -> anyhow::Result<MessagesScreen> {
    let name = conversation_rows(&ctx.cache, ctx.config.user_id)
        .into_iter()
        .find(|row| row.group_id == group)
        .map(|row| row.name)
        .with_context(|| format!("{group} is not one of your conversations"))?;
    ctx.store.dispatch(Action::Nav(NavAction::Navigate(Route::Messages { group_id: group, title: name, icon: None })));
    let entry = ctx.store.state().nav.current().clone();
    let mut screen = MessagesScreen::new(ctx.clone(), &entry).context("conversation route expected")?;
    screen.load().await?;
    screen.observe().await?;
    Ok(screen)
}

fn print_conversations(ctx: &ClientContext) {
    for row in conversation_rows(&ctx.cache, ctx.config.user_id) {
        let preview = row.preview_text.as_deref().unwrap_or("(no messages)");
        println!("{:>4}  {:<16} {:>3} unread  {}", row.group_id.0, row.name, row.unread_count, preview);
    }
}

fn print_conversation(screen: &MessagesScreen) {
    let Some(view) = screen.view() else {
        println!("(not loaded)");
        return;
    };
    println!("# {} ({} unread)", view.name, view.unread_count);
    for row in view.rows.iter().rev() {
        let marker = if row.is_current_user { '>' } else { ' ' };
        println!("{marker} [{}] {}: {}", row.created_at.format("%H:%M"), row.username, row.text);
    }
}
