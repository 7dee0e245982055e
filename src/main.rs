use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use feedengine::config::Config;
use feedengine::loader::{
    Admission, ChannelListener, FeedListener, HttpTransport, LoadEvent, LoadManager,
};
use feedengine::model::{EntryId, FeedHandle, FeedId, ReadStatus};
use feedengine::storage::{FeedStore, GlobalSettings};
use feedengine::util::{truncate_to_width, validate_url};
use feedengine::LoadStatus;

/// Get the config file path (~/.config/feedengine/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("feedengine")
        .join("config.toml"))
}

fn default_store_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("feedengine"))
}

/// Output width; `COLUMNS` when the shell exports it.
fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .filter(|&w: &usize| w >= 40)
        .unwrap_or(100)
}

fn lock(store: &Mutex<FeedStore>) -> MutexGuard<'_, FeedStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Parser, Debug)]
#[command(name = "feedengine", about = "RSS/Atom feed aggregator")]
struct Args {
    /// Config file (default: ~/.config/feedengine/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store directory, overriding the config file
    #[arg(long, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and load it
    Subscribe {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Only record the subscription
        #[arg(long)]
        no_update: bool,
    },
    /// Remove a subscription and its stored entries
    Unsubscribe { id: u32 },
    /// List subscriptions
    List,
    /// Show the entries of a stored feed
    Show {
        id: u32,
        /// Include read entries
        #[arg(long)]
        all: bool,
    },
    /// Update one feed, or every feed that is due
    Update { id: Option<u32> },
    /// Load a feed without storing it
    Fetch { url: String },
    /// Change the status of an entry
    Mark {
        feed: u32,
        entry: u32,
        #[arg(value_parser = ["read", "unread", "deleted", "keep", "unkeep"])]
        state: String,
    },
    /// Print or modify the global settings
    Settings {
        #[arg(long)]
        max_size_kb: Option<u64>,
        #[arg(long)]
        max_age: Option<u32>,
        #[arg(long)]
        max_entries: Option<u32>,
        #[arg(long)]
        update_interval: Option<u32>,
        #[arg(long)]
        min_update_interval: Option<u32>,
        #[arg(long)]
        show_images: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;

    let store_dir = match args.store.clone().or_else(|| config.store_dir.clone()) {
        Some(dir) => dir,
        None => default_store_dir()?,
    };

    if let Command::Fetch { url } = &args.command {
        return fetch(&config, url).await;
    }

    let store = FeedStore::open(&store_dir, config.defaults.clone(), config.feed_cache_capacity)
        .with_context(|| format!("Failed to open feed store '{}'", store_dir.display()))?;
    let store = Arc::new(Mutex::new(store));

    match args.command {
        Command::Subscribe {
            url,
            title,
            no_update,
        } => {
            let url = validate_url(&url).with_context(|| format!("Invalid feed URL '{url}'"))?;
            let id = lock(&store)
                .subscribe(url.as_str(), title.as_deref())
                .context("Failed to save subscription")?;
            println!("Subscribed to {url} as feed {id}");
            if !no_update {
                update(&config, &store, Some(id)).await?;
            }
        }
        Command::Unsubscribe { id } => {
            lock(&store)
                .unsubscribe(FeedId(id))
                .with_context(|| format!("Failed to unsubscribe feed {id}"))?;
            println!("Unsubscribed feed {id}");
        }
        Command::List => list(&lock(&store)),
        Command::Show { id, all } => show(&store, FeedId(id), all)?,
        Command::Update { id } => update(&config, &store, id.map(FeedId)).await?,
        Command::Fetch { .. } => {}
        Command::Mark { feed, entry, state } => {
            let entry = EntryId(entry);
            let changed = lock(&store)
                .modify_feed(FeedId(feed), |f| match state.as_str() {
                    "read" => f.set_entry_status(entry, ReadStatus::Read),
                    "unread" => f.set_entry_status(entry, ReadStatus::Unread),
                    "deleted" => f.set_entry_status(entry, ReadStatus::Deleted),
                    "keep" => f.set_entry_keep(entry, true),
                    _ => f.set_entry_keep(entry, false),
                })
                .with_context(|| format!("Failed to update feed {feed}"))?;
            if !changed {
                anyhow::bail!("Feed {feed} has no entry {entry}");
            }
        }
        Command::Settings {
            max_size_kb,
            max_age,
            max_entries,
            update_interval,
            min_update_interval,
            show_images,
        } => {
            let mut store = lock(&store);
            let mut settings = store.settings().clone();
            let current = settings.clone();
            if let Some(v) = max_size_kb {
                settings.max_size_kb = v;
            }
            if let Some(v) = max_age {
                settings.max_age_minutes = v;
            }
            if let Some(v) = max_entries {
                settings.max_entries = v;
            }
            if let Some(v) = update_interval {
                settings.update_interval_minutes = v;
            }
            if let Some(v) = min_update_interval {
                settings.min_update_interval_minutes = v;
            }
            if let Some(v) = show_images {
                settings.show_images = v;
            }
            if settings != current {
                store
                    .set_settings(settings)
                    .context("Failed to save settings")?;
            }
            print_settings(store.settings());
        }
    }

    lock(&store).save_all().context("Failed to save feed store")?;
    Ok(())
}

fn list(store: &FeedStore) {
    let width = terminal_width();
    println!("{:>4}  {:>11}  {:<13}  TITLE", "ID", "UNREAD/ALL", "STATUS");
    for stub in store.stubs() {
        let counts = format!("{}/{}", stub.unread_count(), stub.total_count());
        let title = truncate_to_width(stub.title(), width.saturating_sub(36));
        println!(
            "{:>4}  {:>11}  {:<13}  {}",
            stub.id(),
            counts,
            stub.status().as_str(),
            title
        );
    }
}

fn show(store: &Mutex<FeedStore>, id: FeedId, all: bool) -> Result<()> {
    let handle = lock(store)
        .feed(id)
        .with_context(|| format!("Failed to load feed {id}"))?;
    print_feed(&handle, all);
    lock(store).release(handle);
    Ok(())
}

fn print_feed(handle: &FeedHandle, all: bool) {
    let width = terminal_width();
    let feed = handle.read();
    let title = feed.title().text_or_empty();
    println!("{}", if title.is_empty() { feed.url() } else { title });
    if feed.link().has_uri() {
        println!("{}", feed.link().uri);
    }
    println!("{} unread of {} entries", feed.unread_count(), feed.total_count());
    println!();

    for entry in feed.visible_entries() {
        if !all && !entry.is_unread() {
            continue;
        }
        let marker = match (entry.is_unread(), entry.keep()) {
            (_, true) => 'K',
            (true, false) => '*',
            (false, false) => ' ',
        };
        let date = entry
            .published()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        let title = truncate_to_width(entry.title().text_or_empty(), width.saturating_sub(20));
        println!("{:>5} {marker} {date}  {title}", entry.id());
    }
}

fn print_settings(settings: &GlobalSettings) {
    let limit = |v: u64| if v == 0 { "unlimited".to_string() } else { v.to_string() };
    println!("max-size-kb          {}", limit(settings.max_size_kb));
    println!("max-age              {}", limit(settings.max_age_minutes.into()));
    println!("max-entries          {}", limit(settings.max_entries.into()));
    println!("update-interval      {}", settings.update_interval_minutes);
    println!("min-update-interval  {}", settings.min_update_interval_minutes);
    println!("show-images          {}", settings.show_images);
}

async fn update(config: &Config, store: &Arc<Mutex<FeedStore>>, id: Option<FeedId>) -> Result<()> {
    let transport = HttpTransport::new(&config.user_agent).context("Failed to build HTTP client")?;
    let manager = LoadManager::with_store(Arc::new(transport), config.loader(), Arc::clone(store));
    let (listener, mut events) = ChannelListener::new();
    manager.add_listener(Arc::new(listener));

    let scheduled = match id {
        Some(id) => match manager.update_feed(id, None)? {
            // listeners were already told
            Admission::Finished(_) => 0,
            _ => 1,
        },
        None => manager.update_all()?,
    };
    if scheduled == 0 && id.is_none() {
        println!("No feed is due for an update");
    }

    manager.wait_idle().await;
    report(&mut events, store);
    Ok(())
}

fn report(events: &mut mpsc::UnboundedReceiver<LoadEvent>, store: &Mutex<FeedStore>) {
    let mut new_entries = 0usize;
    while let Ok(event) = events.try_recv() {
        match event {
            LoadEvent::FeedLoaded {
                feed: Some(id),
                status,
            } => {
                let store = lock(store);
                let title = store.stub(id).map(|s| s.title().to_string());
                println!(
                    "{}: {}",
                    title.unwrap_or_else(|| format!("Feed {id}")),
                    status.message()
                );
            }
            LoadEvent::FeedLoaded { feed: None, status } => {
                if status != LoadStatus::RefreshPostponed {
                    println!("{}", status.message());
                }
            }
            LoadEvent::EntryLoaded { is_new: true, .. } => new_entries += 1,
            LoadEvent::EntryLoaded { .. } | LoadEvent::UpdateFinished => {}
        }
    }
    if new_entries > 0 {
        println!("{new_entries} new entries");
    }
}

/// Captures the outcome of a transient load.
#[derive(Default)]
struct FetchResult(Mutex<Option<(Option<FeedHandle>, LoadStatus)>>);

impl FeedListener for FetchResult {
    fn on_feed_loaded(&self, feed: Option<&FeedHandle>, status: LoadStatus) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some((feed.cloned(), status));
    }
}

async fn fetch(config: &Config, url: &str) -> Result<()> {
    let url = validate_url(url).with_context(|| format!("Invalid feed URL '{url}'"))?;
    let transport = HttpTransport::new(&config.user_agent).context("Failed to build HTTP client")?;
    let manager = LoadManager::new(Arc::new(transport), config.loader());

    let result = Arc::new(FetchResult::default());
    manager.load_feed(url.as_str(), Some(Arc::clone(&result) as Arc<dyn FeedListener>))?;
    manager.wait_idle().await;

    let outcome = result.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    match outcome {
        Some((Some(feed), status)) if status.is_success() => {
            print_feed(&feed, true);
            Ok(())
        }
        Some((_, status)) => anyhow::bail!("{url}: {}", status.message()),
        None => anyhow::bail!("{url}: load did not finish"),
    }
}
