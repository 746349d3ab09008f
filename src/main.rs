use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use podsync::storage::{read_json, write_json};
use podsync::{
    ChangeSource, EpisodeMetadataStore, EpisodeRef, EventBus, FeedLoader, FileRemoteStore,
    JsonFilePreferences, Podcast, PodcastManager, ProviderId, ReqwestClient, SyncContext,
    SyncController, SyncCoordinator, SyncError, SyncListener, SyncMode, SyncOptions,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SYNC: Emoji<'_, '_> = Emoji("🔄 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static CLOUD: Emoji<'_, '_> = Emoji("☁️  ", "[r] ");

/// Keep podcast subscriptions and listening state in sync across devices
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Keep podcast subscriptions and listening state in sync across devices")]
#[command(version)]
struct Args {
    /// Directory holding subscriptions, episode state and sync state
    #[arg(short, long)]
    state_dir: PathBuf,

    /// JSON file with sync options
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed after checking that it loads
    Subscribe { url: String },

    /// Unsubscribe from a feed
    Unsubscribe { url: String },

    /// Mark an episode as listened
    MarkOld { feed: String, episode: String },

    /// Mark an episode as new
    MarkNew { feed: String, episode: String },

    /// Set the resume position of an episode
    Resume {
        feed: String,
        episode: String,
        millis: u64,
    },

    /// Show subscriptions and pending sync changes
    Status,

    /// Synchronize with a remote file, linking it if needed
    Sync {
        /// JSON file shared between devices
        #[arg(short, long)]
        remote: PathBuf,

        /// Name the remote is tracked under
        #[arg(short, long, default_value = "file")]
        provider: String,

        /// Sync direction; keeps the linked mode when omitted
        #[arg(short, long)]
        mode: Option<ModeArg>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    SendOnly,
    SendReceive,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SendOnly => SyncMode::SendOnly,
            ModeArg::SendReceive => SyncMode::SendReceive,
        }
    }
}

/// A linked remote, persisted in `remotes.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkedRemote {
    path: PathBuf,
    mode: SyncMode,
}

/// Sync listener drawing a spinner and printing results
struct ConsoleListener {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl ConsoleListener {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self {
            bar,
            failures: AtomicUsize::new(0),
        }
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl SyncListener for ConsoleListener {
    fn on_sync_triggered(&self, provider: &ProviderId) {
        self.bar.enable_steady_tick(Duration::from_millis(100));
        self.bar
            .set_message(format!("{SYNC}Syncing with {}", provider.as_str().cyan()));
    }

    fn on_sync_completed(&self, provider: &ProviderId) {
        self.bar.println(format!(
            "{SUCCESS}{} {}",
            "Synced with".green(),
            provider.as_str().bold()
        ));
    }

    fn on_sync_failed(&self, provider: &ProviderId, error: &SyncError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "{FAILURE}{} {}: {}",
            "Sync failed for".red(),
            provider.as_str().bold(),
            error.to_string().dimmed()
        ));
    }
}

/// Everything one invocation works with
struct Session {
    state_dir: PathBuf,
    ctx: SyncContext,
    coordinator: SyncCoordinator,
    remotes: BTreeMap<String, LinkedRemote>,
    options: SyncOptions,
    listener: Arc<ConsoleListener>,
}

impl Session {
    fn open(state_dir: &Path, options: SyncOptions) -> Result<Self> {
        let events = Arc::new(EventBus::new());
        let episodes = Arc::new(EpisodeMetadataStore::new(events.clone()));
        episodes
            .load(&state_dir.join("metadata.json"))
            .context("Failed to load episode metadata")?;
        episodes.mark_loaded();

        let client = ReqwestClient::with_timeout(options.feed_timeout())
            .context("Failed to create HTTP client")?;
        let loader = Arc::new(FeedLoader::new(client));
        let podcasts = Arc::new(PodcastManager::new(loader, episodes.clone(), events.clone()));
        podcasts
            .load(&state_dir.join("podcasts.json"))
            .context("Failed to load subscriptions")?;

        let prefs = Arc::new(
            JsonFilePreferences::open(&state_dir.join("prefs.json"))
                .context("Failed to open preferences")?,
        );
        let remotes: BTreeMap<String, LinkedRemote> = read_json(&state_dir.join("remotes.json"))
            .context("Failed to read linked remotes")?
            .unwrap_or_default();

        let session = Self {
            state_dir: state_dir.to_path_buf(),
            ctx: SyncContext::new(podcasts, episodes, prefs, events, Handle::current()),
            coordinator: SyncCoordinator::new(),
            remotes,
            options,
            listener: Arc::new(ConsoleListener::new()),
        };
        session.coordinator.add_listener(session.listener.clone());
        for (name, remote) in &session.remotes {
            session.activate(name, remote);
        }
        Ok(session)
    }

    fn activate(&self, name: &str, remote: &LinkedRemote) -> Arc<SyncController> {
        let controller = SyncController::new(
            ProviderId::new(name),
            Arc::new(FileRemoteStore::new(&remote.path)),
            self.ctx.clone(),
            self.options.clone(),
        );
        controller.set_mode(remote.mode);
        self.coordinator.add_controller(controller.clone());
        controller
    }

    fn link(&mut self, name: &str, path: PathBuf, mode: Option<SyncMode>) -> Result<Arc<SyncController>> {
        let provider = ProviderId::new(name);
        let existing = self.remotes.get(name).cloned();
        let remote = LinkedRemote {
            mode: mode
                .or_else(|| existing.as_ref().map(|remote| remote.mode))
                .unwrap_or_default(),
            path,
        };

        let unchanged = existing.as_ref().is_some_and(|e| e.path == remote.path);
        let controller = match self.coordinator.controller(&provider) {
            Some(controller) if unchanged => {
                self.coordinator.set_mode(&provider, remote.mode);
                controller
            }
            _ => {
                println!(
                    "{CLOUD}Linked {} to {}",
                    name.bold(),
                    remote.path.display().to_string().cyan()
                );
                self.activate(name, &remote)
            }
        };

        self.remotes.insert(name.to_string(), remote);
        write_json(&self.state_dir.join("remotes.json"), &self.remotes)
            .context("Failed to save linked remotes")?;
        Ok(controller)
    }

    async fn close(self) -> Result<usize> {
        self.coordinator.wait_until_idle().await;
        self.listener.finish();
        self.coordinator.deactivate_all();

        self.ctx
            .podcasts
            .save(&self.state_dir.join("podcasts.json"))
            .context("Failed to save subscriptions")?;
        if self.ctx.episodes.take_dirty() {
            self.ctx
                .episodes
                .save(&self.state_dir.join("metadata.json"))
                .context("Failed to save episode metadata")?;
        }
        Ok(self.listener.failures())
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("podsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podsync=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_status(session: &Session) {
    let podcasts = session.ctx.podcasts.podcast_list();
    println!(
        "{HEADPHONES}{} subscriptions",
        podcasts.len().to_string().cyan().bold()
    );
    for podcast in &podcasts {
        println!("  {} {}", podcast.name.bold(), podcast.url.dimmed());
    }

    for (name, remote) in &session.remotes {
        let Some(controller) = session.coordinator.controller(&ProviderId::new(name)) else {
            continue;
        };
        let tracked = controller.tracker().snapshot();
        println!(
            "\n{CLOUD}{} ({:?}) {}",
            name.bold(),
            remote.mode,
            remote.path.display().to_string().dimmed()
        );
        println!(
            "  {} added, {} removed, {} episode changes pending",
            tracked.added.len().to_string().yellow(),
            tracked.removed.len().to_string().yellow(),
            controller.outgoing().len().to_string().yellow()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    println!(
        "\n{}{} {}\n",
        MICROPHONE,
        "podsync".bold().magenta(),
        "- Podcast Sync".dimmed()
    );

    let options = match &args.options {
        Some(path) => SyncOptions::load(path)
            .with_context(|| format!("Failed to read options from {}", path.display()))?,
        None => SyncOptions::default(),
    };
    let mut session = Session::open(&args.state_dir, options)?;

    match args.command {
        Command::Subscribe { url } => {
            let podcast = session
                .ctx
                .podcasts
                .load_podcast(&Podcast::new(&url, url.as_str()))
                .await
                .with_context(|| format!("Failed to load feed {url}"))?;
            let name = podcast.name.clone();
            if session.ctx.podcasts.add_podcast(podcast, ChangeSource::Local) {
                println!("{SUCCESS}Subscribed to {}", name.bold().green());
            } else {
                println!("Already subscribed to {}", name.bold());
            }
        }
        Command::Unsubscribe { url } => {
            match session
                .ctx
                .podcasts
                .remove_podcast_by_url(&url, ChangeSource::Local)
            {
                Some(podcast) => println!("Unsubscribed from {}", podcast.name.bold()),
                None => bail!("Not subscribed to {url}"),
            }
        }
        Command::MarkOld { feed, episode } => {
            let episode = EpisodeRef::new(&feed, &episode);
            session
                .ctx
                .episodes
                .set_old(&episode, Some(true), ChangeSource::Local);
        }
        Command::MarkNew { feed, episode } => {
            let episode = EpisodeRef::new(&feed, &episode);
            session
                .ctx
                .episodes
                .set_old(&episode, Some(false), ChangeSource::Local);
        }
        Command::Resume {
            feed,
            episode,
            millis,
        } => {
            let episode = EpisodeRef::new(&feed, &episode);
            session
                .ctx
                .episodes
                .set_resume_at(&episode, Some(millis), ChangeSource::Local);
        }
        Command::Status => print_status(&session),
        Command::Sync {
            remote,
            provider,
            mode,
        } => {
            let controller = session.link(&provider, remote, mode.map(SyncMode::from))?;
            controller.sync();
        }
    }

    let failures = session.close().await?;
    if failures > 0 {
        std::process::exit(1);
    }

    Ok(())
}
