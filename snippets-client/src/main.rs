//! snippets-client - run snippet delivery against a simulated host
//!
//! Loads a catalog, answers the engine's fact requests from command-line
//! values, shows the selected snippet on the console, and manages the
//! persisted block list.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use snippets_client::delivery::BLOCK_BUTTON_CLASS;
use snippets_client::geo::CountryResolver;
use snippets_client::host::{ConsoleSurface, SimulatedFacts, StaticHost};
use snippets_client::{
    open_block_store, parse_catalog, BlockId, BlockList, ClickEvent, ClientEnvironment,
    CorrelationBus, DeliveryController, DeliveryOutcome, DeliverySettings, ElementRef,
    MetricsReporter, BUS_CAPACITY,
};
use snippets_common::{time, ClientConfig};
use tracing::{info, warn};

/// Command-line arguments for snippets-client
#[derive(Parser, Debug)]
#[command(name = "snippets-client")]
#[command(about = "Snippet selection and delivery with a simulated host")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, env = "SNIPPETS_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the block list database
    #[arg(short, long, env = "SNIPPETS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Major version of the current release, for relative version bounds
    #[arg(long, env = "SNIPPETS_CURRENT_RELEASE")]
    current_release: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select and show one snippet from a catalog
    Show(ShowArgs),
    /// Add an id (campaign or snippet id) to the block list
    Block { id: String },
    /// Remove an id from the block list
    Unblock { id: String },
    /// List blocked ids, most recent first
    Blocked,
    /// Empty the block list
    Clear,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Catalog JSON file
    #[arg(long)]
    catalog: PathBuf,

    #[arg(long, default_value = "Mozilla/5.0 (X11; Linux x86_64; rv:68.0) Gecko/20100101 Firefox/68.0")]
    user_agent: String,

    #[arg(long, default_value_t = 1280)]
    screen_width: u32,

    /// Simulated `sync.setup` answer
    #[arg(long)]
    account: Option<bool>,

    /// Simulated `appinfo.defaultBrowser` answer
    #[arg(long)]
    default_browser: Option<bool>,

    /// Simulated `appinfo.profileCreatedWeeksAgo` answer
    #[arg(long)]
    profile_age: Option<u32>,

    /// Simulated `appinfo.telemetryEnabled` answer
    #[arg(long)]
    telemetry: Option<bool>,

    /// Simulated `selectedSearchEngine` answer
    #[arg(long)]
    search_engine: Option<String>,

    #[arg(long)]
    test_cohort: Option<bool>,

    /// Use this country instead of geolocating
    #[arg(long)]
    country: Option<String>,

    /// How long to let fact answers land before selecting
    #[arg(long, default_value_t = 200)]
    fact_wait_ms: u64,

    /// Press the block button after showing
    #[arg(long)]
    dismiss: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snippets_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Build identification first, before any I/O
    info!(
        "Starting snippets-client v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();
    let mut config = ClientConfig::resolve(cli.config.as_deref(), cli.root_folder.as_deref())
        .context("Failed to load configuration")?;
    if let Some(release) = cli.current_release {
        config.current_release = Some(release);
        config.validate().context("Invalid --current-release")?;
    }
    info!("Root folder: {}", config.root_folder.display());

    match cli.command {
        Command::Show(args) => show(&config, args).await,
        Command::Block { id } => {
            let list = open_list(&config).await;
            list.block(&BlockId::new(id)).await;
            Ok(())
        }
        Command::Unblock { id } => {
            let list = open_list(&config).await;
            list.unblock(&BlockId::new(id)).await;
            Ok(())
        }
        Command::Blocked => {
            let list = open_list(&config).await;
            for id in list.ids() {
                println!("{}", id);
            }
            Ok(())
        }
        Command::Clear => {
            let list = open_list(&config).await;
            let count = list.len();
            list.clear().await;
            info!(count = count, "Block list cleared");
            Ok(())
        }
    }
}

async fn open_list(config: &ClientConfig) -> BlockList {
    let opened = open_block_store(config).await;
    if !opened.store.is_durable() {
        warn!("Running without persistence; changes will not be kept");
    }
    BlockList::new(opened.store)
}

async fn show(config: &ClientConfig, args: ShowArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.catalog)
        .with_context(|| format!("Failed to read catalog {}", args.catalog.display()))?;
    let catalog = parse_catalog(&raw).context("Failed to parse catalog")?;
    info!(count = catalog.len(), "Catalog loaded");

    let opened = open_block_store(config).await;
    let block_list = BlockList::new(opened.store);

    let bus = CorrelationBus::new(BUS_CAPACITY);
    let _host = StaticHost::new(SimulatedFacts {
        account_configured: args.account,
        default_browser: args.default_browser,
        profile_age_weeks: args.profile_age,
        telemetry_enabled: args.telemetry,
        search_engine: args.search_engine,
    })
    .spawn(bus.clone());

    let environment = ClientEnvironment {
        user_agent: args.user_agent,
        screen_width: args.screen_width,
        test_cohort: args.test_cohort,
    };
    let metrics = Arc::new(MetricsReporter::from_config(config));
    let mut controller = DeliveryController::new(
        DeliverySettings::from(config),
        environment,
        bus,
        block_list,
        metrics,
        Arc::new(ConsoleSurface),
    );

    match &args.country {
        Some(country) => controller.facts().set_country(country, time::now()).await,
        None => {
            controller = controller.with_country_resolver(CountryResolver::from_config(
                config,
                opened.pool.clone(),
            ));
        }
    }

    if let Some(requests) = controller.request_facts().await {
        let wait = Duration::from_millis(args.fact_wait_ms);
        if tokio::time::timeout(wait, requests.settled()).await.is_err() {
            info!("Some host facts still pending; selecting with what is known");
        }
    }

    let DeliveryOutcome::Shown {
        snippet_id,
        block_id,
        impression,
    } = controller.deliver(&catalog).await
    else {
        return Ok(());
    };
    impression.await;
    info!(snippet_id = snippet_id, block_id = %block_id, "Snippet shown");

    if args.dismiss {
        let button = ElementRef {
            tag: "button".to_string(),
            classes: vec![BLOCK_BUTTON_CLASS.to_string()],
            ..Default::default()
        };
        let region = ElementRef {
            id: Some(DeliverySettings::from(config).tracked_region_id),
            ..Default::default()
        };
        let response = controller
            .handle_click(&ClickEvent::primary(vec![button, region]))
            .await;
        response.followup.await;
    }

    Ok(())
}
