mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nomad_feed::config::FeedConfig;
use nomad_feed::fetcher::ConnectionKind;
use nomad_feed::telemetry;
use nomad_feed::utils::APP_NAME;
use nomad_feed::ViewerSession;

use crate::cli::{App, FilterTerms};

#[derive(Parser)]
#[command(author, version, about = "Browse indexer feeds, threads and connections")]
struct Args {
    /// TOML config file; NOMAD_* environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Indexer API base URL, overriding config and environment
    #[arg(long, global = true)]
    indexer: Option<String>,

    /// Domain to hide from every feed (repeatable)
    #[arg(long = "block", global = true)]
    blocks: Vec<String>,

    /// Author to hide from every feed (repeatable)
    #[arg(long = "mute", global = true)]
    mutes: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Newest posts from everyone
    Discover {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Posts from the accounts USER follows
    Home {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Posts, replies and likes carrying a tag
    Tag {
        tag: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Ad-hoc filter; at least one criterion is needed for any results
    Filter {
        #[arg(long = "posted-by")]
        posted_by: Vec<String>,
        #[arg(long = "replied-by")]
        replied_by: Vec<String>,
        #[arg(long = "liked-by")]
        liked_by: Vec<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// A post with its ancestors and reply tree
    Thread { hash: String },
    /// followers, followees or blockees of a user
    Connections {
        user: String,
        kind: ConnectionKind,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Interactive shell (default)
    Shell {
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FeedConfig::load(path)?,
        None => FeedConfig::from_env(),
    };
    if let Some(indexer) = args.indexer {
        config.indexer_api = indexer;
    }
    tracing::info!(app = APP_NAME, indexer = %config.indexer_api, page_size = config.page_size, "starting");

    let mut session = ViewerSession::default();
    session.blocklist.extend(args.blocks);
    session.muted.extend(args.mutes);

    let command = args.command.unwrap_or(Command::Shell { user: None });
    if let Command::Home { user, .. } | Command::Shell { user: Some(user) } = &command {
        session.username = Some(user.clone());
    }
    let mut app = App::new(config, session)?;

    match command {
        Command::Discover { pages } => app.run_discover(pages).await,
        Command::Home { pages, .. } => {
            app.load_followings().await?;
            app.run_home(pages).await
        }
        Command::Tag { tag, pages } => app.run_tag(tag, pages).await,
        Command::Filter {
            posted_by,
            replied_by,
            liked_by,
            tags,
            pages,
        } => {
            let terms = FilterTerms {
                posted_by,
                replied_by,
                liked_by,
                tags,
            };
            app.run_filter(terms.into_filter(), pages).await
        }
        Command::Thread { hash } => app.run_thread(&hash).await,
        Command::Connections { user, kind, pages } => app.run_connections(&user, kind, pages).await,
        Command::Shell { .. } => {
            if app.session().username.is_some() {
                app.load_followings().await?;
            }
            cli::run_shell(app).await
        }
    }
}
