//! Command dispatch: wires config, store, gateway, sync and worker together
//! for each CLI invocation.

use clap::Subcommand;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::types::{Photo, StoryDraft, StoryRecord};
use crate::api::{HttpGateway, OfflineClient, RemoteApi, Source, WriteOutcome};
use crate::config::Config;
use crate::db::LocalStore;
use crate::sync::{Connectivity, ConnectivityProbe, SyncCoordinator, SyncReport};
use crate::worker::{
  AssetCache, AssetCacheManager, AssetFetcher, ConsoleNotifier, HttpFetcher, Interception,
  Interceptor, Notification, Request, WorkerHandle,
};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create an account
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Log in and print the bearer token
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// List stories, from the network when reachable
  Stories {
    /// Offline read: serve the local mirror without a network round-trip
    #[arg(long)]
    cached: bool,
  },
  /// Publish a story, or save it for later sync when offline
  Add {
    #[arg(short, long)]
    description: String,
    /// Path to the photo file
    #[arg(short, long)]
    photo: PathBuf,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,
  },
  /// Show one story from the local mirror
  Show { id: String },
  /// Edit a story in the local mirror
  Edit {
    id: String,
    #[arg(short, long)]
    description: String,
  },
  /// Remove a story from the local mirror
  Delete { id: String },
  /// Show queued operations
  Queue {
    /// Discard the operation with this id instead
    #[arg(long)]
    drop: Option<i64>,
  },
  /// Replay the queue once
  Sync,
  /// Follow connectivity and replay the queue whenever it comes back
  Watch,
  /// App-shell cache lifecycle
  #[command(subcommand)]
  Assets(AssetsCommand),
  /// Deliver a push message to the worker
  Push {
    /// JSON payload: {"title", "message", "url"}
    payload: String,
    /// Simulate a click: `view-details`, `dismiss` or `body`
    #[arg(long)]
    click: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
pub enum AssetsCommand {
  /// Fetch and cache the app shell for the configured version
  Install,
  /// Drop caches from older versions
  Activate,
  /// Send a request through the worker
  Fetch {
    /// Absolute URL, or a path on the app origin
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
  },
}

/// Everything a story command needs.
struct Context {
  client: OfflineClient,
}

impl Context {
  async fn connect(config: &Config, offline: bool) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let store = Arc::new(LocalStore::open(&data_dir.join("storysync.db"))?);
    debug!(schema = store.schema_version()?, "opened local store");
    let api: Arc<dyn RemoteApi> = Arc::new(HttpGateway::new(&config.api)?);

    let online = !offline && probe(config)?.check().await;
    info!(online, "starting");
    let connectivity = Connectivity::new(online);

    let coordinator = SyncCoordinator::new(store, Arc::clone(&api), connectivity, &config.sync);
    let client = OfflineClient::new(api, coordinator, config.author());
    Ok(Self { client })
  }

  fn sync(&self) -> &SyncCoordinator {
    self.client.sync()
  }

  fn store(&self) -> &LocalStore {
    self.sync().store()
  }
}

fn probe(config: &Config) -> Result<ConnectivityProbe> {
  let target = Url::parse(&config.api.base_url)
    .map_err(|e| eyre!("Invalid api.base_url '{}': {}", config.api.base_url, e))?;
  Ok(ConnectivityProbe::new(
    target,
    Duration::from_secs(config.sync.probe_interval_secs),
  ))
}

/// Stories need a token online; offline reads work without one.
fn token() -> String {
  Config::get_token().unwrap_or_else(|e| {
    warn!(error = %e, "no token, remote calls will be rejected");
    String::new()
  })
}

pub async fn run(config: Config, offline: bool, command: Command) -> Result<()> {
  match command {
    Command::Register {
      name,
      email,
      password,
    } => {
      let ctx = Context::connect(&config, offline).await?;
      let message = ctx.client.register(&name, &email, &password).await?;
      println!("{}", message);
    }
    Command::Login { email, password } => {
      let ctx = Context::connect(&config, offline).await?;
      let login = ctx.client.login(&email, &password).await?;
      println!("Logged in as {} ({})", login.name, login.user_id);
      println!("export STORYSYNC_TOKEN={}", login.token);
    }
    Command::Stories { cached } => {
      let ctx = Context::connect(&config, offline).await?;
      let fetched = ctx.client.list_stories(&token(), cached).await?;
      let label = match fetched.source {
        Source::Network => "network",
        Source::Local => "local mirror",
      };
      println!("{} stories ({})", fetched.data.len(), label);
      for record in &fetched.data {
        print_story(record);
      }
    }
    Command::Add {
      description,
      photo,
      lat,
      lon,
    } => {
      let ctx = Context::connect(&config, offline).await?;
      let draft = StoryDraft {
        description,
        photo: read_photo(&photo)?,
        lat,
        lon,
      };
      match ctx.client.create_story(&token(), draft).await? {
        WriteOutcome::Published(record) => println!("Published {}", record.id),
        WriteOutcome::SavedLocally {
          record,
          operation_id,
        } => println!(
          "Saved {} locally, queued as operation {}",
          record.id, operation_id
        ),
      }
      print_reports(&ctx.sync().drain().await);
    }
    Command::Show { id } => {
      let ctx = Context::connect(&config, true).await?;
      let record = ctx
        .store()
        .get_by_id(&id)?
        .ok_or_else(|| eyre!("No story {}", id))?;
      print_story(&record);
      println!("    updated {}", record.updated_at);
    }
    Command::Edit { id, description } => {
      let ctx = Context::connect(&config, true).await?;
      let mut record = ctx
        .store()
        .get_by_id(&id)?
        .ok_or_else(|| eyre!("No story {}", id))?;
      record.description = description;
      let record = ctx.store().update(record)?;
      println!("Updated {} at {}", record.id, record.updated_at);
    }
    Command::Delete { id } => {
      let ctx = Context::connect(&config, true).await?;
      if ctx.client.delete_local(&id)? {
        println!("Deleted {}", id);
      } else {
        println!("No story {}", id);
      }
    }
    Command::Queue { drop: Some(op_id) } => {
      let ctx = Context::connect(&config, true).await?;
      if !ctx.store().drop_operation(op_id)? {
        return Err(eyre!("No operation {}", op_id));
      }
      println!("Dropped operation {} and its unsynced story", op_id);
    }
    Command::Queue { drop: None } => {
      let ctx = Context::connect(&config, true).await?;
      let entries = ctx.store().all_operations()?;
      if entries.is_empty() {
        println!("Queue is empty");
      }
      for entry in entries {
        println!(
          "#{} {} [{}] local={} retries={} next={} {}",
          entry.id,
          entry.op_type,
          entry.status.as_str(),
          entry.operation.local_id(),
          entry.retry_count,
          entry.next_attempt_at.as_deref().unwrap_or("-"),
          entry.last_error.as_deref().unwrap_or("")
        );
      }
    }
    Command::Sync => {
      let ctx = Context::connect(&config, offline).await?;
      if !ctx.sync().connectivity().is_online() {
        return Err(eyre!("Offline, nothing replayed"));
      }
      let report = ctx.sync().replay_all().await?;
      print_reports(&[report]);
    }
    Command::Watch => watch(&config, offline).await?,
    Command::Assets(cmd) => assets(&config, cmd).await?,
    Command::Push { payload, click } => {
      let worker = spawn_worker(&config)?;
      let url = Notification::from_push(payload.as_bytes())?.map(|n| n.url);
      worker.push(payload.into_bytes())?;
      if let (Some(click), Some(url)) = (click, url) {
        let action = (click != "body").then_some(click);
        match worker.notification_click(action, url).await? {
          Some(target) => println!("Open {}", target),
          None => println!("Dismissed"),
        }
      }
      worker.shutdown().await;
    }
  }
  Ok(())
}

async fn watch(config: &Config, offline: bool) -> Result<()> {
  let ctx = Context::connect(config, offline).await?;
  let connectivity = ctx.sync().connectivity().clone();

  let listener = ctx.sync().listen();
  let prober = (!offline)
    .then(|| probe(config))
    .transpose()?
    .map(|p| p.spawn(connectivity.clone()));

  if connectivity.is_online() {
    print_reports(&[ctx.sync().replay_all().await?]);
  }
  println!("Watching connectivity, Ctrl-C to stop");

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;

  if let Some(prober) = prober {
    prober.abort();
  }
  listener.abort();
  print_reports(&ctx.sync().drain().await);
  Ok(())
}

async fn assets(config: &Config, cmd: AssetsCommand) -> Result<()> {
  let worker = spawn_worker(config)?;
  match cmd {
    AssetsCommand::Install => {
      let count = worker.install().await?;
      println!("Cached {} assets as {}", count, config.assets.version);
    }
    AssetsCommand::Activate => {
      let deleted = worker.activate().await?;
      if deleted.is_empty() {
        println!("No stale caches");
      }
      for name in deleted {
        println!("Deleted cache {}", name);
      }
    }
    AssetsCommand::Fetch { url, method } => {
      let origin = Url::parse(&config.app.origin)?;
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| eyre!("Invalid method {}", method))?;
      let request = Request::new(method, origin.join(&url)?);
      match worker.fetch(request).await? {
        Interception::Passthrough => println!("Not intercepted"),
        Interception::Respond(response) => {
          println!("{} ({})", response.status, response.kind.as_str());
          for (name, value) in &response.headers {
            println!("{}: {}", name, value);
          }
          println!();
          std::io::stdout().write_all(&response.body)?;
        }
      }
    }
  }
  worker.shutdown().await;
  Ok(())
}

fn spawn_worker(config: &Config) -> Result<WorkerHandle> {
  let cache = Arc::new(AssetCache::open(&config.data_dir()?.join("assets.db"))?);
  let fetcher: Arc<dyn AssetFetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
    config.api.timeout_secs,
  ))?);
  let origin = Url::parse(&config.app.origin)
    .map_err(|e| eyre!("Invalid app.origin '{}': {}", config.app.origin, e))?;

  let manager = AssetCacheManager::new(
    Arc::clone(&cache),
    Arc::clone(&fetcher),
    origin,
    &config.assets,
  );
  let interceptor = Interceptor::new(cache, fetcher, &config.app, &config.assets.version)?;
  Ok(WorkerHandle::spawn(manager, interceptor, Arc::new(ConsoleNotifier))?)
}

fn read_photo(path: &Path) -> Result<Photo> {
  let data = std::fs::read(path)
    .map_err(|e| eyre!("Failed to read photo {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "photo.jpg".to_string());
  Ok(Photo::from_bytes(file_name, data))
}

fn print_story(record: &StoryRecord) {
  let marker = if record.is_local { " [pending]" } else { "" };
  let location = match (record.lat, record.lon) {
    (Some(lat), Some(lon)) => format!(" @ {:.5},{:.5}", lat, lon),
    _ => String::new(),
  };
  println!(
    "{}  {}  {}{}{}",
    record.created_at, record.id, record.name, location, marker
  );
  println!("    {}", record.description);
}

fn print_reports(reports: &[SyncReport]) {
  for report in reports {
    if report.visited.is_empty() {
      continue;
    }
    println!(
      "Sync: {} synced, {} failed, {} deferred",
      report.synced.len(),
      report.failed.len(),
      report.deferred.len()
    );
  }
}
