use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use nomad_feed::backfill::BackfillAggregator;
use nomad_feed::config::FeedConfig;
use nomad_feed::feed::{ApplyOutcome, FeedSnapshot, FeedSource};
use nomad_feed::fetcher::ConnectionKind;
use nomad_feed::thread::ThreadController;
use nomad_feed::{
    ConnectionList, Cursor, FeedControls, FeedView, Filter, IndexerClient, Post, PostStore, ViewerSession,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command-line filter criteria before they become a [`Filter`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterTerms {
    pub posted_by: Vec<String>,
    pub replied_by: Vec<String>,
    pub liked_by: Vec<String>,
    pub tags: Vec<String>,
}

impl FilterTerms {
    /// Parses shell terms such as `posted:alice@nomad liked:bob tag:rust`.
    pub fn parse(terms: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        for term in terms {
            let (key, value) = term
                .split_once(':')
                .filter(|(_, value)| !value.is_empty())
                .ok_or_else(|| anyhow!("expected key:value, got '{term}'"))?;
            let target = match key {
                "posted" | "by" => &mut parsed.posted_by,
                "replied" => &mut parsed.replied_by,
                "liked" => &mut parsed.liked_by,
                "tag" => &mut parsed.tags,
                other => return Err(anyhow!("unknown filter key '{other}'")),
            };
            target.push(value.to_string());
        }
        Ok(parsed)
    }

    pub fn into_filter(self) -> Filter {
        Filter {
            posted_by: self.posted_by,
            replied_by: self.replied_by,
            liked_by: self.liked_by,
            allowed_tags: self.tags,
            ..Filter::default()
        }
    }
}

/// Shared engine handles for one-shot commands and the shell.
pub struct App {
    config: FeedConfig,
    client: Arc<IndexerClient>,
    store: PostStore,
    session: ViewerSession,
}

impl App {
    pub fn new(config: FeedConfig, session: ViewerSession) -> Result<Self> {
        let client = IndexerClient::from_config(&config)
            .with_context(|| format!("invalid indexer url {}", config.indexer_api))?;
        Ok(Self {
            config,
            client: Arc::new(client),
            store: PostStore::new(),
            session,
        })
    }

    pub fn session(&self) -> &ViewerSession {
        &self.session
    }

    fn feed(&self, source: FeedSource) -> FeedView {
        FeedView::new(
            source,
            BackfillAggregator::new(self.client.clone(), self.config.page_size),
            self.store.clone(),
        )
    }

    fn thread(&self) -> ThreadController {
        ThreadController::new(self.client.clone(), self.store.clone(), &self.config)
    }

    /// Fills the session's followings from the indexer so the home feed has
    /// something to extend.
    pub async fn load_followings(&mut self) -> Result<()> {
        let Some(user) = self.session.username.clone() else {
            return Ok(());
        };
        let list = ConnectionList::new(self.client.clone());
        if let Some(ApplyOutcome::Merged { .. }) = list.show(&user, ConnectionKind::Followees).await {
            list.load_remaining().await;
        }
        let snapshot = list.snapshot();
        if let Some(error) = snapshot.error {
            return Err(anyhow!("failed to load followings of {user}: {error}"));
        }
        tracing::info!(%user, followings = snapshot.list.len(), "loaded followings");
        self.session.followings.extend(snapshot.list);
        Ok(())
    }

    pub async fn run_discover(&self, pages: usize) -> Result<()> {
        self.print_feed(FeedSource::Discover, pages).await
    }

    pub async fn run_home(&self, pages: usize) -> Result<()> {
        let source = FeedSource::Home {
            controls: FeedControls::default(),
        };
        self.print_feed(source, pages).await
    }

    pub async fn run_tag(&self, tag: String, pages: usize) -> Result<()> {
        self.print_feed(FeedSource::Tag(tag), pages).await
    }

    pub async fn run_filter(&self, filter: Filter, pages: usize) -> Result<()> {
        let source = FeedSource::Custom {
            filter,
            controls: FeedControls::default(),
        };
        self.print_feed(source, pages).await
    }

    async fn print_feed(&self, source: FeedSource, pages: usize) -> Result<()> {
        let view = self.feed(source);
        view.sync(&self.session).await;
        for _ in 1..pages {
            if view.load_more().await.is_none() {
                break;
            }
        }
        let snapshot = view.snapshot();
        print_posts(&view.posts(), 0);
        print_footer(&snapshot);
        failure(&snapshot)
    }

    pub async fn run_thread(&self, hash: &str) -> Result<()> {
        let thread = self.thread();
        thread.open(hash, &self.session).await?;
        self.print_thread(&thread);
        Ok(())
    }

    fn print_thread(&self, thread: &ThreadController) {
        for ancestor in thread.ancestors() {
            match self.store.get(&ancestor) {
                Some(post) => println!("^ {}", summary(&post)),
                None => println!("^ {ancestor}"),
            }
        }
        for row in thread.rows() {
            let marker = match (row.replies, row.expanded) {
                (0, _) => ' ',
                (_, true) => '-',
                (_, false) => '+',
            };
            let text = self
                .store
                .get(&row.hash)
                .map(|post| summary(&post))
                .unwrap_or_else(|| row.hash.clone());
            println!("{}{marker} {text}", "  ".repeat(row.depth));
            if let Some(error) = &row.error {
                println!("{}  ! {error}", "  ".repeat(row.depth));
            } else if row.expanded && row.can_load_more {
                println!("{}  … more replies (more {})", "  ".repeat(row.depth), row.hash);
            }
        }
    }

    pub async fn run_connections(&self, user: &str, kind: ConnectionKind, pages: usize) -> Result<()> {
        let list = ConnectionList::new(self.client.clone());
        list.show(user, kind).await;
        for _ in 1..pages {
            if list.load_more().await.is_none() {
                break;
            }
        }
        let snapshot = list.snapshot();
        for name in &snapshot.list {
            println!("{name}");
        }
        print_footer(&snapshot);
        failure(&snapshot)
    }
}

fn summary(post: &Post) -> String {
    let text = if post.title.is_empty() { &post.content } else { &post.title };
    let line = text.lines().next().unwrap_or_default();
    let short: String = line.chars().take(72).collect();
    let hash: String = post.hash.chars().take(12).collect();
    format!(
        "{hash} {} [{} replies, {} likes] {short}",
        post.creator, post.meta.reply_count, post.meta.like_count
    )
}

fn print_posts(posts: &[Post], start: usize) {
    for (index, post) in posts.iter().enumerate().skip(start) {
        println!("{:>3}. {}", index + 1, summary(post));
    }
}

fn print_footer(snapshot: &FeedSnapshot) {
    match snapshot.cursor {
        Cursor::Offset(_) => println!("-- {} shown, 'more' for next page --", snapshot.list.len()),
        _ => println!("-- {} shown, end of list --", snapshot.list.len()),
    }
}

fn failure(snapshot: &FeedSnapshot) -> Result<()> {
    match &snapshot.error {
        Some(error) => Err(anyhow!("{error}")),
        None => Ok(()),
    }
}

enum LoopAction {
    Continue,
    Exit,
}

enum Focus {
    Feed,
    Thread,
    Connections,
}

struct ShellSession {
    app: App,
    feed: FeedView,
    thread: ThreadController,
    connections: ConnectionList,
    focus: Focus,
}

/// Interactive shell over one feed, one thread and one connection list.
pub async fn run_shell(app: App) -> Result<()> {
    let mut shell = ShellSession {
        feed: app.feed(FeedSource::Discover),
        thread: app.thread(),
        connections: ConnectionList::new(app.client.clone()),
        app,
        focus: Focus::Feed,
    };

    println!("Feed shell ready. Type 'help' for a list of commands.");
    println!("Indexer: {}", shell.app.client.base_url());

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("nomad> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match shell.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => {
                println!("Error: {err:#}");
            }
        }
    }
    Ok(())
}

impl ShellSession {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        let arg = tokens.get(1).map(String::as_str);
        match command {
            "help" => {
                self.print_help();
            }
            "discover" => {
                self.switch_feed(FeedSource::Discover).await;
            }
            "home" => {
                if self.app.session.followings.is_empty() {
                    println!("Not following anyone; start the shell with --user or use 'follow <name>'");
                }
                self.switch_feed(FeedSource::Home {
                    controls: FeedControls::default(),
                })
                .await;
            }
            "tag" => {
                let Some(tag) = arg else {
                    println!("Usage: tag <tag>");
                    return Ok(LoopAction::Continue);
                };
                self.switch_feed(FeedSource::Tag(tag.to_string())).await;
            }
            "filter" => {
                if tokens.len() < 2 {
                    println!("Usage: filter posted:<user> replied:<user> liked:<user> tag:<tag> ...");
                    return Ok(LoopAction::Continue);
                }
                let filter = FilterTerms::parse(&tokens[1..])?.into_filter();
                self.switch_feed(FeedSource::Custom {
                    filter,
                    controls: FeedControls::default(),
                })
                .await;
            }
            "more" => {
                self.more(arg).await;
            }
            "refresh" => {
                self.feed.refresh(&self.app.session).await;
                self.focus = Focus::Feed;
                self.show_feed(0);
            }
            "thread" | "open" => {
                let Some(hash) = arg else {
                    println!("Usage: thread <hash>");
                    return Ok(LoopAction::Continue);
                };
                self.thread.open(hash, &self.app.session).await?;
                self.focus = Focus::Thread;
                self.app.print_thread(&self.thread);
            }
            "expand" | "collapse" => {
                let Some(hash) = arg else {
                    println!("Usage: {command} <hash>");
                    return Ok(LoopAction::Continue);
                };
                if !self.thread.set_expanded(hash, command == "expand") {
                    println!("No node {hash} in the open thread");
                    return Ok(LoopAction::Continue);
                }
                self.thread.load_visible().await;
                self.app.print_thread(&self.thread);
            }
            "unmod" | "mod" => {
                let Some(hash) = arg else {
                    println!("Usage: {command} <hash>");
                    return Ok(LoopAction::Continue);
                };
                match self.thread.set_remove_moderation(hash, command == "unmod").await {
                    Some(outcome) => report(outcome),
                    None => println!("Moderation already {}", if command == "unmod" { "removed" } else { "applied" }),
                }
                self.app.print_thread(&self.thread);
            }
            "block" | "unblock" | "mute" | "unmute" | "follow" => {
                let Some(name) = arg else {
                    println!("Usage: {command} <name>");
                    return Ok(LoopAction::Continue);
                };
                let session = &mut self.app.session;
                let changed = match command {
                    "block" => session.block(name),
                    "unblock" => session.unblock(name),
                    "mute" => session.mute(name),
                    "unmute" => session.unmute(name),
                    _ => session.follow(name),
                };
                if !changed {
                    println!("Nothing to change for {name}");
                    return Ok(LoopAction::Continue);
                }
                let feed_reloaded = self.feed.sync(&self.app.session).await.is_some();
                let thread_reloaded = self.thread.sync(&self.app.session).await.is_some();
                match self.focus {
                    Focus::Thread if thread_reloaded => self.app.print_thread(&self.thread),
                    Focus::Feed if feed_reloaded => self.show_feed(0),
                    _ => {}
                }
            }
            "connections" => {
                let (Some(user), Some(kind)) = (arg, tokens.get(2)) else {
                    println!("Usage: connections <user> followers|followees|blockees");
                    return Ok(LoopAction::Continue);
                };
                let kind: ConnectionKind = kind.parse().map_err(|err: String| anyhow!(err))?;
                self.connections.show(user, kind).await;
                self.focus = Focus::Connections;
                self.show_connections();
            }
            "show" => match self.focus {
                Focus::Feed => self.show_feed(0),
                Focus::Thread => self.app.print_thread(&self.thread),
                Focus::Connections => self.show_connections(),
            },
            "quit" | "exit" => return Ok(LoopAction::Exit),
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
            }
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
            }
        }
        Ok(LoopAction::Continue)
    }

    async fn switch_feed(&mut self, source: FeedSource) {
        println!("== {} ==", source.title());
        self.feed.set_source(source, &self.app.session).await;
        self.focus = Focus::Feed;
        self.show_feed(0);
    }

    async fn more(&mut self, hash: Option<&str>) {
        match (&self.focus, hash) {
            (Focus::Thread, Some(hash)) => match self.thread.load_more(hash).await {
                Some(outcome) => {
                    report(outcome);
                    self.thread.load_visible().await;
                    self.app.print_thread(&self.thread);
                }
                None => println!("No more replies under {hash}"),
            },
            (Focus::Connections, _) => match self.connections.load_more().await {
                Some(outcome) => {
                    report(outcome);
                    self.show_connections();
                }
                None => println!("End of list"),
            },
            _ => {
                let before = self.feed.snapshot().list.len();
                match self.feed.load_more().await {
                    Some(outcome) => {
                        report(outcome);
                        self.show_feed(before);
                    }
                    None => println!("End of feed"),
                }
            }
        }
    }

    fn show_feed(&self, start: usize) {
        print_posts(&self.feed.posts(), start);
        let snapshot = self.feed.snapshot();
        if let Some(error) = &snapshot.error {
            println!("! {error}");
        }
        print_footer(&snapshot);
    }

    fn show_connections(&self) {
        let snapshot = self.connections.snapshot();
        for name in &snapshot.list {
            println!("{name}");
        }
        if let Some(error) = &snapshot.error {
            println!("! {error}");
        }
        print_footer(&snapshot);
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  help                   Show this help message");
        println!("  discover               Newest posts from everyone");
        println!("  home                   Posts from accounts you follow");
        println!("  tag <tag>              Posts carrying a tag");
        println!("  filter KEY:VALUE ...   Custom filter (posted:, replied:, liked:, tag:)");
        println!("  more [hash]            Next page of the feed, list, or a thread node");
        println!("  refresh                Reload the current feed from the start");
        println!("  thread <hash>          Open a post with its ancestors and replies");
        println!("  expand|collapse <hash> Show or hide a node's replies");
        println!("  unmod|mod <hash>       Remove or restore the author's reply moderation");
        println!("  block|unblock <domain> Edit the blocklist");
        println!("  mute|unmute <name>     Edit muted authors");
        println!("  follow <name>          Add to followings for the home feed");
        println!("  connections <user> <followers|followees|blockees>");
        println!("  show                   Reprint the current view");
        println!("  clear                  Clear the screen");
        println!("  exit                   Quit the shell");
    }
}

fn report(outcome: ApplyOutcome) {
    match outcome {
        ApplyOutcome::Merged { added } => tracing::debug!(added, "page merged"),
        ApplyOutcome::Stale => println!("(result superseded by a newer request)"),
        ApplyOutcome::Failed => println!("Load failed; run the command again to retry"),
    }
}
