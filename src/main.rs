use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flight_price_monitor::config::AppConfig;
use flight_price_monitor::database::Database;
use flight_price_monitor::models::{NotificationFrequency, SavedSearch};
use flight_price_monitor::monitor::{AlertGenerator, CooldownGate, PriceMonitor, UserProcessor};
use flight_price_monitor::notifier::{HttpEmailTransport, NotificationDispatcher};
use flight_price_monitor::preferences::PreferenceStore;
use flight_price_monitor::pricing::HttpFlightProvider;
use flight_price_monitor::scheduler::Scheduler;
use flight_price_monitor::searches::SearchRepository;
use flight_price_monitor::telemetry::{RecorderMetrics, TracingErrorTracker, install_prometheus};
use flight_price_monitor::traits::{Clock, PRICE_ALERTS, SystemClock};

#[derive(Parser)]
#[command(
    name = "flight-price-monitor",
    about = "Re-checks saved flight searches and emails price alerts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run {
        /// Six-field cron expression (seconds first)
        #[arg(long, env = "MONITOR_CRON")]
        cron: Option<String>,
    },

    /// Run a single batch now and print its result
    ProcessNow,

    /// Load saved searches from a JSON array file
    ImportSearches { path: PathBuf },

    /// Update a user's notification preferences
    SetPreferences {
        #[arg(long)]
        user: String,
        #[arg(long)]
        email: Option<String>,
        /// INSTANT, HOURLY, DAILY, WEEKLY or NEVER
        #[arg(long)]
        frequency: Option<NotificationFrequency>,
        #[arg(long)]
        price_alerts: Option<bool>,
    },
}

/// Everything the commands need, wired once at startup
struct App {
    database: Database,
    monitor: Arc<PriceMonitor>,
    searches: Arc<SearchRepository>,
    preferences: Arc<PreferenceStore>,
}

impl App {
    async fn new(config: &AppConfig) -> Result<Self> {
        let database = Database::new(&config.database_url).await?;
        let store = Arc::new(database.clone());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(RecorderMetrics);

        let provider = Arc::new(HttpFlightProvider::new(&config.flight_api)?);
        let searches = Arc::new(SearchRepository::new(store.clone(), provider, clock.clone()));
        let preferences = Arc::new(PreferenceStore::new(store.clone()));

        let dispatcher = config.email_notifications.then(|| {
            NotificationDispatcher::new(
                Arc::new(HttpEmailTransport::new(config.email.clone())),
                preferences.clone(),
                metrics.clone(),
            )
        });

        let processor = UserProcessor::new(
            searches.clone(),
            preferences.clone(),
            CooldownGate::new(store.clone(), clock.clone(), config.batch.alert_cooldown_hours),
            AlertGenerator::new(searches.clone(), dispatcher),
            clock,
        );

        let monitor = Arc::new(PriceMonitor::new(
            config.batch.clone(),
            store,
            processor,
            metrics,
            Arc::new(TracingErrorTracker),
        ));

        Ok(Self {
            database,
            monitor,
            searches,
            preferences,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "flight_price_monitor=info,warn",
        1 => "flight_price_monitor=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = AppConfig::load();
    if let Some(addr) = config.metrics_addr {
        install_prometheus(addr)?;
    }
    let app = App::new(&config).await?;

    match cli.command {
        Command::Run { cron } => {
            let cron = cron.unwrap_or(config.cron_expression);
            info!("Starting flight price monitor");

            let purged = app.database.purge_expired().await?;
            info!("Purged {} expired store entries", purged);

            let scheduler = Scheduler::new(Arc::clone(&app.monitor));
            scheduler.start(&cron).await?;

            let status = scheduler.get_status().await;
            info!(
                "Scheduler running (batch size {}, max concurrent {}), next run: {:?}",
                status.config.batch_size, status.config.max_concurrent, status.next_run
            );

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            scheduler.stop().await?;
        }

        Command::ProcessNow => {
            let result = Scheduler::new(Arc::clone(&app.monitor)).process_now().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::ImportSearches { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let searches: Vec<SavedSearch> =
                serde_json::from_str(&raw).context("Expected a JSON array of saved searches")?;

            for search in &searches {
                app.searches.save_search(search).await?;
            }
            println!("Imported {} saved searches", searches.len());
        }

        Command::SetPreferences {
            user,
            email,
            frequency,
            price_alerts,
        } => {
            let mut prefs = app.preferences.load(&user).await?.unwrap_or_default();
            if email.is_some() {
                prefs.email = email;
            }
            if frequency.is_some() {
                prefs.frequency = frequency;
            }
            if let Some(enabled) = price_alerts {
                prefs.notifications.insert(PRICE_ALERTS.to_string(), enabled);
            }

            app.preferences.save(&user, &prefs).await?;
            println!("Preferences saved for {user}");
        }
    }

    Ok(())
}
