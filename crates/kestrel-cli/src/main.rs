use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kestrel_client::{
    ApiSessionSource, DriverCategorySource, DriverConfig, HeadlessDriver, ReqwestListingFetcher,
};
use kestrel_core::category::CategoryGraph;
use kestrel_core::config::PoolConfig;
use kestrel_core::driver::SiteProfile;
use kestrel_core::explorer::{self, CategoryExplorer, CategoryNode, ExplorerConfig};
use kestrel_core::listing::SortOrder;
use kestrel_core::lock::SharedLock;
use kestrel_core::models::{BrowserEngine, Category, ProxyPartition, ProxyType};
use kestrel_core::proxy::{ProxyPool, split_lines};
use kestrel_core::sink::JsonFileSink;
use kestrel_core::walker::{PoolSessionSource, ProductWalker, SessionSource, WalkerConfig};
use kestrel_db::{Database, DatabaseConfig, build_identity_pool};

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Crawl orchestration over pooled identities")]
struct Cli {
    /// Directory for category trees and listing pages
    #[arg(long, global = true, env = "KESTREL_OUTPUT_DIR", default_value = "data")]
    output: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Category tree exploration
    #[command(subcommand)]
    Categories(CategoryCommand),

    /// Paginated product listing crawl
    #[command(subcommand)]
    Products(ProductCommand),

    /// Proxy pool administration
    #[command(subcommand)]
    Proxies(ProxyCommand),
}

#[derive(Subcommand)]
enum CategoryCommand {
    /// Explore one batch of top-level keywords and write their trees
    Scrape {
        /// Keywords per batch
        #[arg(long)]
        batch_size: usize,

        /// Zero-based batch to explore
        #[arg(long)]
        batch_index: usize,

        /// Subcategory pages expanded per keyword
        #[arg(long)]
        search_width: Option<u32>,

        /// Deepest level expanded (root is 0)
        #[arg(long)]
        max_depth: Option<u32>,

        /// Override the default department list (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        #[arg(long, env = "KESTREL_ENGINE", default_value = "chromium")]
        engine: BrowserEngine,

        /// Aggregate every tree on disk into the category store afterwards
        #[arg(long, default_value_t = false)]
        store: bool,
    },

    /// Reload every per-keyword tree, flatten it and replace the category store
    Aggregate,
}

#[derive(Subcommand)]
enum ProductCommand {
    /// Walk listing pages of stored categories
    Scrape(ProductScrapeArgs),
}

#[derive(Args)]
struct ProductScrapeArgs {
    /// Category depth to crawl (-1 selects every leaf)
    #[arg(long, allow_hyphen_values = true)]
    depth: i32,

    /// Only categories at exactly `depth`
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Stop a category after this many products
    #[arg(long, default_value_t = 50_000)]
    product_cap: u64,

    /// Stop a category after this many pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Categories walked at once
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Pages served per identity before rotating
    #[arg(long, default_value_t = 3)]
    rotate_every: u32,

    /// featured | newest | bestsellers | reviews | price-desc | price-asc
    #[arg(long, default_value = "newest")]
    sort: SortOrder,

    /// Draw identities from a running kestrel-server instead of the database pools
    #[arg(long, env = "KESTREL_SERVER_URL")]
    server: Option<String>,

    #[arg(long, env = "KESTREL_ENGINE", default_value = "chromium")]
    engine: BrowserEngine,

    #[command(flatten)]
    partition: PartitionArgs,
}

#[derive(Args)]
struct PartitionArgs {
    #[arg(long, default_value = ProxyPartition::DEFAULT_TAG)]
    tag: String,

    #[arg(long, default_value = ProxyPartition::DEFAULT_PROVIDER)]
    provider: String,

    /// static | dynamic
    #[arg(long, default_value = "dynamic")]
    proxy_type: ProxyType,
}

impl PartitionArgs {
    fn partition(&self) -> ProxyPartition {
        ProxyPartition::new(self.tag.clone(), self.provider.clone(), self.proxy_type)
    }
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Replace one proxy partition with the lines of a file
    Replace {
        /// Provider export, one proxy per line
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        partition: PartitionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kestrel=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink = JsonFileSink::new(&cli.output);

    match cli.command {
        Commands::Categories(CategoryCommand::Scrape {
            batch_size,
            batch_index,
            search_width,
            max_depth,
            keywords,
            engine,
            store,
        }) => {
            let keywords = if keywords.is_empty() {
                explorer::default_keywords()
            } else {
                keywords
            };
            let config = ExplorerConfig {
                search_width,
                max_depth,
            };
            cmd_explore(&sink, &keywords, batch_size, batch_index, config, engine).await?;
            if store {
                cmd_aggregate(&sink, &connect_db().await?).await?;
            }
        }
        Commands::Categories(CategoryCommand::Aggregate) => {
            cmd_aggregate(&sink, &connect_db().await?).await?;
        }
        Commands::Products(ProductCommand::Scrape(args)) => {
            cmd_products(sink, args).await?;
        }
        Commands::Proxies(ProxyCommand::Replace { file, partition }) => {
            cmd_replace_proxies(&file, partition.partition()).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()
        .context("DATABASE_URL not set. Required for the category and proxy stores.")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_explore(
    sink: &JsonFileSink,
    keywords: &[String],
    batch_size: usize,
    batch_index: usize,
    config: ExplorerConfig,
    engine: BrowserEngine,
) -> Result<()> {
    let batch = explorer::select_batch(keywords, batch_size, batch_index)?;
    tracing::info!(?batch, "Exploring keyword batch {batch_index}");

    let profile = Arc::new(SiteProfile::from_env()?);
    let driver = HeadlessDriver::launch(&DriverConfig::from_env()?).await?;
    let source = DriverCategorySource::new(driver, profile, engine);
    let tree_explorer = CategoryExplorer::new(source, config);

    let mut written = 0;
    for (keyword, result) in tree_explorer.explore(batch).await {
        match result {
            Ok(tree) => {
                sink.write_tree(&tree).await?;
                written += 1;
            }
            Err(e) => tracing::warn!(%keyword, error = %e, "No tree written"),
        }
    }

    if written == 0 {
        bail!("Every keyword in batch {batch_index} failed");
    }
    tracing::info!(written, total = batch.len(), "Category exploration finished");
    Ok(())
}

async fn cmd_aggregate(sink: &JsonFileSink, db: &Database) -> Result<()> {
    let trees: Vec<CategoryNode> = sink.read_trees().await?;
    if trees.is_empty() {
        bail!(
            "No category trees found under {}",
            sink.root().join("trees").display()
        );
    }
    let path = sink.write_aggregate(&trees).await?;
    tracing::info!(trees = trees.len(), path = %path.display(), "Wrote aggregated tree");

    let rows = explorer::flatten(&trees);
    let graph = CategoryGraph::new(db.category_store());
    if !graph.replace(&rows).await {
        bail!("Failed to replace the category store");
    }
    println!("Stored {} categories from {} trees", rows.len(), trees.len());
    Ok(())
}

async fn cmd_products(sink: JsonFileSink, args: ProductScrapeArgs) -> Result<()> {
    let db = connect_db().await?;
    let categories = CategoryGraph::new(db.category_store())
        .crawl_targets(args.depth, args.strict)
        .await;
    if categories.is_empty() {
        bail!(
            "No categories stored at depth {} (strict: {})",
            args.depth,
            args.strict
        );
    }

    let config = WalkerConfig {
        product_cap: args.product_cap,
        max_pages: args.max_pages,
        concurrency: args.concurrency,
        rotate_every: args.rotate_every,
        sort: args.sort,
        ..WalkerConfig::default()
    };
    let partition = args.partition.partition();

    match args.server {
        Some(url) => {
            tracing::info!(%url, "Drawing identities from server");
            let sessions = ApiSessionSource::new(url, args.engine, partition)?;
            walk(sessions, sink, categories, config).await
        }
        None => {
            let identities =
                build_identity_pool(&PoolConfig::from_env()?, Some(&db), SharedLock::new())?;
            let proxies = ProxyPool::new(db.proxy_store());
            let sessions = PoolSessionSource::new(identities, proxies, args.engine, partition);
            walk(sessions, sink, categories, config).await
        }
    }
}

async fn walk<S: SessionSource>(
    sessions: S,
    sink: JsonFileSink,
    categories: Vec<Category>,
    config: WalkerConfig,
) -> Result<()> {
    let profile = Arc::new(SiteProfile::from_env()?);
    let fetcher = ReqwestListingFetcher::new()?;
    tracing::info!(
        categories = categories.len(),
        sort = %config.sort,
        concurrency = config.concurrency,
        "Starting product walk"
    );

    let walker = ProductWalker::new(fetcher, sessions, sink, profile, config);
    let reports = walker.run(categories).await;

    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }
    let failed = reports.iter().filter(|r| r.status.is_failure()).count();
    let products: u64 = reports.iter().map(|r| r.products).sum();
    tracing::info!(categories = reports.len(), failed, products, "Product walk finished");
    Ok(())
}

fn read_proxy_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proxy file: {}", path.display()))?;
    let lines = split_lines(&text);
    if lines.is_empty() {
        bail!("Proxy file {} has no entries", path.display());
    }
    Ok(lines)
}

async fn cmd_replace_proxies(file: &Path, partition: ProxyPartition) -> Result<()> {
    let lines = read_proxy_file(file)?;
    let db = connect_db().await?;
    let pool = ProxyPool::new(db.proxy_store());

    if !pool.replace(&partition, &lines).await {
        bail!("Failed to replace proxies for {partition}");
    }
    println!(
        "Replaced {partition} with {} proxies ({} stored)",
        lines.len(),
        pool.current_size(&partition).await
    );
    Ok(())
}
