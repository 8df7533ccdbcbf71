use crate::cache::{
  ConnectivityMonitor, DrainReport, MemoryMirror, Mirror, OfflineError, OfflineManager,
  PostOutcome, RequestOptions, SqliteMirror, Transport,
};
use crate::config::Config;
use crate::event::EventHandler;
use crate::site::types::{ContactMessage, PrayerRequest};
use crate::site::{CachedSiteClient, SiteClient};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;

/// Commands understood by the client
#[derive(Subcommand, Debug)]
pub enum Command {
  /// List recent sermons
  Sermons,
  /// List upcoming events
  Events,
  /// List ministries
  Ministries,
  /// Search the site
  Search { query: String },
  /// Read any API path through the offline cache
  Get { target: String },
  /// Submit a prayer request
  Pray {
    #[arg(long)]
    title: String,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    name: Option<String>,
    /// Only share with the pastoral team
    #[arg(long)]
    private: bool,
  },
  /// Send a message through the contact form
  Contact {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    message: String,
  },
  /// Sign up for the newsletter
  Subscribe { email: String },
  /// POST a JSON payload to any API path, queueing it if it cannot be delivered
  Post { target: String, json: String },
  /// Deliver queued writes now
  Sync,
  /// Show connectivity, cache and queue state
  Status,
  /// Manage the response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Manage writes the sync policy gave up on
  DeadLetters {
    #[command(subcommand)]
    action: DeadLetterAction,
  },
  /// Watch connectivity and deliver queued writes whenever the site comes back
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// Drop every cached response
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum DeadLetterAction {
  /// Show dead-lettered writes
  List,
  /// Put dead-lettered writes back in the queue
  Retry,
  /// Delete dead-lettered writes
  Discard,
}

/// Startup switches that override the config file
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
  /// Start offline regardless of the probe
  pub offline: bool,
  /// Keep cache and queue in memory only
  pub no_persist: bool,
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Raw transport, used for connectivity probes
  transport: Arc<SiteClient>,

  /// Offline layer shared by every command
  manager: Arc<OfflineManager>,

  /// Typed site client
  site: CachedSiteClient,

  /// Command-line overrides
  overrides: Overrides,
}

impl App {
  pub async fn new(config: Config, overrides: Overrides) -> Result<Self> {
    let transport = Arc::new(SiteClient::new(&config)?);
    let mirror = Self::open_mirror(&config, overrides)?;

    let connectivity = if overrides.offline {
      ConnectivityMonitor::new(false)
    } else if config.connectivity.probe_path.is_some() {
      ConnectivityMonitor::new(transport.probe().await)
    } else {
      ConnectivityMonitor::always_online()
    };
    tracing::info!(
      site = %transport.base_url(),
      online = connectivity.is_online(),
      "starting"
    );

    let manager = OfflineManager::new(transport.clone(), mirror, connectivity)
      .with_sync_policy(config.sync.policy())
      .with_max_entries(config.cache.max_entries);
    let manager = Arc::new(manager);
    let site = CachedSiteClient::new(Arc::clone(&manager));

    Ok(Self {
      config,
      transport,
      manager,
      site,
      overrides,
    })
  }

  fn open_mirror(config: &Config, overrides: Overrides) -> Result<Arc<dyn Mirror>> {
    if overrides.no_persist || !config.storage.persist {
      return Ok(Arc::new(MemoryMirror::new()));
    }

    let path = match &config.storage.path {
      Some(path) => path.clone(),
      None => SqliteMirror::default_path()?,
    };
    Ok(Arc::new(SqliteMirror::open_at(&path)?))
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Sermons => {
        for sermon in self.site.sermons().await? {
          let date = sermon.date.as_deref().unwrap_or("");
          let speaker = sermon.speaker.as_deref().unwrap_or("");
          println!("{:<10} {:<12} {:<40} {}", sermon.id, date, sermon.title, speaker);
        }
      }
      Command::Events => {
        for event in self.site.events().await? {
          let starts = event.starts_at.as_deref().unwrap_or("");
          let location = event.location.as_deref().unwrap_or("");
          println!("{:<22} {:<40} {}", starts, event.title, location);
        }
      }
      Command::Ministries => {
        for ministry in self.site.ministries().await? {
          let summary = ministry.summary.as_deref().unwrap_or("");
          println!("{:<24} {}", ministry.name, summary);
        }
      }
      Command::Search { query } => {
        let hits = self.site.search(&query).await?;
        if hits.is_empty() {
          println!("No results for \"{}\"", query);
        }
        for hit in hits {
          println!("{} ({})", hit.title, hit.url);
          if let Some(excerpt) = hit.excerpt {
            println!("    {}", excerpt);
          }
        }
      }
      Command::Get { target } => {
        match self
          .manager
          .fetch_with_cache(&target, &RequestOptions::read())
          .await
        {
          Ok(data) => print_json(&data)?,
          Err(OfflineError::NoCachedDataOffline { .. }) => {
            return Err(eyre!(
              "{} is not cached and the site is unreachable; try again once online",
              target
            ));
          }
          Err(e) => return Err(e.into()),
        }
      }
      Command::Pray {
        title,
        body,
        name,
        private,
      } => {
        let request = PrayerRequest {
          title,
          body,
          name,
          is_private: private,
        };
        let outcome = self.site.submit_prayer_request(&request).await?;
        print_outcome(&outcome)?;
      }
      Command::Contact {
        name,
        email,
        subject,
        message,
      } => {
        let message = ContactMessage {
          name,
          email,
          subject,
          message,
        };
        let outcome = self.site.send_contact_message(&message).await?;
        print_outcome(&outcome)?;
      }
      Command::Subscribe { email } => {
        let outcome = self.site.subscribe_newsletter(&email).await?;
        print_outcome(&outcome)?;
      }
      Command::Post { target, json } => {
        let payload: Value =
          serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
        let outcome = self.manager.post_with_sync(&target, payload).await?;
        print_outcome(&outcome)?;
      }
      Command::Sync => {
        if !self.manager.is_online() {
          println!("Offline; {} write(s) still queued", self.manager.pending_writes().len());
          return Ok(());
        }
        let report = self.manager.sync_pending().await;
        print_report(&report);
      }
      Command::Status => self.print_status(),
      Command::Cache {
        action: CacheAction::Clear,
      } => {
        let removed = self.manager.clear_cache();
        println!("Removed {} cached response(s)", removed);
      }
      Command::DeadLetters { action } => match action {
        DeadLetterAction::List => {
          for write in self.manager.dead_letters() {
            println!(
              "{} {:<6} {:<30} attempts {}",
              write.id,
              write.method.as_str(),
              write.target,
              write.attempts
            );
          }
        }
        DeadLetterAction::Retry => {
          let count = self.manager.requeue_dead_letters();
          println!("Requeued {} write(s)", count);
        }
        DeadLetterAction::Discard => {
          let count = self.manager.discard_dead_letters();
          println!("Discarded {} write(s)", count);
        }
      },
      Command::Watch => self.watch().await?,
    }

    Ok(())
  }

  fn print_status(&self) {
    let pending = self.manager.pending_writes();
    let dead_letters = self.manager.dead_letters();

    println!("Site:         {}", self.transport.base_url());
    println!(
      "Connection:   {}",
      if self.manager.is_online() {
        "online"
      } else {
        "offline"
      }
    );
    println!("Cached:       {} response(s)", self.manager.cached_entries().len());
    println!("Queued:       {} write(s)", pending.len());
    for write in &pending {
      println!(
        "  {:<6} {:<30} queued {}  attempts {}",
        write.method.as_str(),
        write.target,
        write.queued_at.format("%Y-%m-%d %H:%M:%S"),
        write.attempts
      );
    }
    println!("Dead letters: {}", dead_letters.len());
    if !pending.is_empty() {
      println!("\nRun `chapel sync` or `chapel watch` to deliver queued writes.");
    }
  }

  /// Follow connectivity until Ctrl-C, draining the queue on every reconnect.
  ///
  /// While online, writes that other `chapel` runs queued are delivered on the
  /// next probe.
  async fn watch(&self) -> Result<()> {
    if self.overrides.offline {
      return Err(eyre!(
        "`chapel watch` follows live connectivity and cannot be combined with --offline"
      ));
    }

    if self.config.connectivity.probe_path.is_none() {
      println!("No connectivity.probe_path configured; delivering queued writes once.");
      print_report(&self.manager.sync_pending().await);
      return Ok(());
    }

    let sync_task = self.manager.spawn_sync_on_reconnect();
    if self.manager.is_online() {
      print_report(&self.manager.sync_pending().await);
    }

    let transport: Arc<dyn Transport> = self.transport.clone();
    let mut events = EventHandler::new(transport, self.config.connectivity.probe_interval());
    println!("Watching {} (Ctrl-C to stop)", self.transport.base_url());

    loop {
      tokio::select! {
        event = events.next() => match event {
          Some(event) => {
            if self.manager.connectivity().apply(event) {
              println!("{}", if self.manager.is_online() { "online" } else { "offline" });
            } else if self.manager.is_online() && self.manager.refresh() > 0 {
              print_report(&self.manager.sync_pending().await);
            }
          }
          None => break,
        },
        result = tokio::signal::ctrl_c() => {
          result.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
          break;
        }
      }
    }

    sync_task.abort();
    Ok(())
  }
}

fn print_json(value: &Value) -> Result<()> {
  let text = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format JSON: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_outcome(outcome: &PostOutcome) -> Result<()> {
  print_json(&outcome.to_json())?;
  if outcome.is_queued() {
    eprintln!("Offline: will be sent when the site is reachable again.");
  }
  Ok(())
}

fn print_report(report: &DrainReport) {
  if report.attempted == 0 {
    println!("Nothing to sync");
    return;
  }
  println!(
    "Delivered {} of {} queued write(s); {} requeued, {} dead-lettered",
    report.delivered, report.attempted, report.requeued, report.dead_lettered
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> Config {
    Config::parse(
      "site:\n  url: https://www.gracechapel.org\nconnectivity:\n  probe_path: /api/health\n",
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_watch_rejects_forced_offline() {
    let overrides = Overrides {
      offline: true,
      no_persist: true,
    };
    let app = App::new(config(), overrides).await.unwrap();

    let err = app.run(Command::Watch).await.unwrap_err();

    assert!(err.to_string().contains("--offline"));
    assert!(!app.manager.is_online());
  }

  #[tokio::test]
  async fn test_forced_offline_still_queues_writes() {
    let overrides = Overrides {
      offline: true,
      no_persist: true,
    };
    let app = App::new(config(), overrides).await.unwrap();

    app
      .run(Command::Subscribe {
        email: "member@gracechapel.org".to_string(),
      })
      .await
      .unwrap();

    assert_eq!(app.manager.pending_writes().len(), 1);
  }
}
