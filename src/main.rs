// file: src/main.rs
// description: commandline application entry point with command handling
// reference: application bootstrap and orchestration

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use visual_engine::providers::{provider_specs, ProviderRegistry};
use visual_engine::utils::logging::{
    format_error, format_info, format_status, format_success, format_warning,
};
use visual_engine::{
    BatchProgress, Config, ProductCatalog, RunOptions, SubmitRequest, TaskProgress, VisualEngine,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "visual_engine")]
#[command(author = "cipher")]
#[command(version = "0.1.0")]
#[command(about = "Product photo to scene image pipeline", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config/default.toml"
    )]
    config: PathBuf,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    color: bool,

    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one product and wait for the result
    Generate {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        detail: String,

        #[arg(long, default_value = "")]
        attributes: String,

        /// Local image file, sent inline
        #[arg(long, conflicts_with_all = ["url", "server_path"])]
        image: Option<PathBuf>,

        #[arg(long)]
        url: Option<String>,

        /// Image already under the outputs mount, e.g. /outputs/white_bg_x.png
        #[arg(long)]
        server_path: Option<String>,

        #[arg(long = "gallery", value_name = "URL")]
        gallery_images: Vec<String>,

        #[arg(long = "detail-image", value_name = "URL")]
        detail_images: Vec<String>,

        #[arg(long)]
        remove_background: bool,

        #[arg(long)]
        background_only: bool,

        /// Keep the product out of the catalog
        #[arg(long)]
        no_persist: bool,

        #[arg(long, value_name = "INDEX")]
        reuse_index: Option<u64>,
    },

    /// Run the pipeline for every product in the catalog
    Batch {
        #[arg(long, value_name = "NUM")]
        limit: Option<usize>,

        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        #[arg(long)]
        remove_background: bool,
    },

    /// Inspect the product catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },

    /// List the registered image providers
    Providers,
}

#[derive(Subcommand)]
enum CatalogCommands {
    NextIndex,
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    visual_engine::utils::logging::init_logger(cli.color, cli.verbose);

    info!("Visual Engine scene pipeline");
    info!("Loading configuration from: {}", cli.config.display());

    let config = if cli.config.exists() {
        Config::load(Some(cli.config.as_path())).context("Failed to load configuration")?
    } else {
        warn!(
            "Config file {} not found, using default configuration",
            cli.config.display()
        );
        Config::default_config()
    };

    match cli.command {
        Commands::Generate {
            name,
            detail,
            attributes,
            image,
            url,
            server_path,
            gallery_images,
            detail_images,
            remove_background,
            background_only,
            no_persist,
            reuse_index,
        } => {
            let mut request = SubmitRequest::new(name);
            request.detail = detail;
            request.attributes = attributes;
            request.image_url = url;
            request.image_path = server_path;
            request.gallery_images = gallery_images;
            request.detail_images = detail_images;
            request.need_background_removal = remove_background;
            request.background_removal_only = background_only;
            request.persist_to_catalog = !no_persist;
            request.reuse_index = reuse_index;
            if let Some(path) = image {
                request.image_base64 = Some(encode_file(&path).await?);
            }
            cmd_generate(&config, request, cli.color).await?;
        }
        Commands::Batch {
            limit,
            workers,
            remove_background,
        } => {
            cmd_batch(&config, limit, workers, remove_background, cli.color).await?;
        }
        Commands::Catalog { command } => {
            let config = config.clone();
            tokio::task::spawn_blocking(move || cmd_catalog(&config, command))
                .await
                .context("Catalog command did not finish")??;
        }
        Commands::Providers => {
            cmd_providers(&config);
        }
    }

    Ok(())
}

async fn encode_file(path: &Path) -> Result<String> {
    use base64::Engine as _;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

async fn cmd_generate(config: &Config, request: SubmitRequest, colored: bool) -> Result<()> {
    let engine = VisualEngine::from_config(config).context("Failed to build pipeline")?;
    let task_id = engine.submit(request).context("Submission rejected")?;

    let progress = TaskProgress::new(&task_id, colored);
    let record = loop {
        let record = engine.poll(&task_id)?;
        if record.status.is_terminal() {
            break record;
        }
        progress.observe(&record);
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    progress.finish(&record);
    println!("Status: {}", format_status(record.status));

    if let Some(message) = &record.error {
        println!("{}", format_error(message));
        return Err(anyhow::anyhow!("Task {} failed", task_id));
    }

    println!(
        "{}",
        format_success(&format!(
            "Task {} completed: {} phrase(s), {} image(s)",
            task_id,
            record.phrases.len(),
            record.images.len()
        ))
    );
    if let Some(index) = record.product_index {
        println!("{}", format_info(&format!("Catalog index: {}", index)));
    }
    for image in &record.images {
        println!("  {}", image);
    }
    if record.images.len() < record.phrases.len() {
        println!(
            "{}",
            format_warning("Some scenes produced no image, see the log for details")
        );
    }

    Ok(())
}

async fn cmd_batch(
    config: &Config,
    limit: Option<usize>,
    workers: usize,
    remove_background: bool,
    colored: bool,
) -> Result<()> {
    let start_time = Instant::now();
    let engine = VisualEngine::from_config(config).context("Failed to build pipeline")?;

    let records = engine
        .catalog_records()
        .await
        .context("Failed to read catalog")?;
    let records: Vec<_> = match limit {
        Some(limit) => records.into_iter().take(limit).collect(),
        None => records,
    };
    if records.is_empty() {
        warn!("Catalog {} has no products", config.catalog_path().display());
        return Ok(());
    }

    info!("Running {} product(s) with {} worker(s)", records.len(), workers.max(1));
    let progress = BatchProgress::new(records.len(), colored);
    let options = RunOptions {
        need_background_removal: remove_background,
        background_removal_only: false,
    };

    let results = stream::iter(records.into_iter().map(|record| {
        let engine = engine.clone();
        let progress = &progress;
        async move {
            progress.set_message(format!("Product {}: {}", record.index, record.name));
            let result = engine.run_record(&record, options).await;
            match &result {
                Ok(task) => progress.record(task),
                Err(_) => progress.skip(),
            }
            (record, result)
        }
    }))
    .buffer_unordered(workers.max(1))
    .collect::<Vec<_>>()
    .await;

    progress.finish();

    for (record, result) in results {
        match result {
            Ok(task) if task.error.is_none() => info!(
                "Product {} ({}): {} image(s)",
                record.index,
                record.name,
                task.images.len()
            ),
            Ok(task) => error!(
                "Product {} ({}) failed: {}",
                record.index,
                record.name,
                task.error.unwrap_or_default()
            ),
            Err(e) => error!("Product {} ({}) skipped: {}", record.index, record.name, e),
        }
    }

    let stats = progress.get_stats();
    println!(
        "{}",
        format_success(&format!(
            "Batch finished in {:.1}s: {} completed, {} failed, {} image(s) ({:.1} per product)",
            start_time.elapsed().as_secs_f64(),
            stats.products_completed,
            stats.products_failed,
            stats.images_generated,
            stats.images_per_product()
        ))
    );

    Ok(())
}

fn cmd_catalog(config: &Config, command: CatalogCommands) -> Result<()> {
    let catalog = ProductCatalog::new(config.catalog_path());

    match command {
        CatalogCommands::NextIndex => {
            println!("{}", catalog.next_index());
        }
        CatalogCommands::List => {
            let records = catalog.records();
            if records.is_empty() {
                println!("{}", format_info("Catalog is empty"));
            }
            for record in records {
                println!(
                    "{:>6}  {:<32}  {}  (+{} gallery, +{} detail)",
                    record.index,
                    record.name,
                    record.main_image,
                    record.sub_images.len(),
                    record.detail_images.len()
                );
            }
        }
    }

    Ok(())
}

fn cmd_providers(config: &Config) {
    let image = &config.image;
    let scene = ProviderRegistry::stage_provider(image.scene_provider.as_deref(), image).ok();
    let background =
        ProviderRegistry::stage_provider(image.background_provider.as_deref(), image).ok();

    for spec in provider_specs() {
        let mut roles = Vec::new();
        if matches!(scene, Some(name) if name.eq_ignore_ascii_case(spec.name)) {
            roles.push("scene");
        }
        if matches!(background, Some(name) if name.eq_ignore_ascii_case(spec.name)) {
            roles.push("background");
        }
        let settings = image.provider_settings(spec.name);
        let model = settings.model.as_deref().unwrap_or(spec.model);
        let keyed = settings.api_key.is_some() || image.gemini_api_key.is_some();

        println!(
            "{:<10} {:<28} {:<40} key:{} {}",
            spec.name,
            model,
            settings.base_url.as_deref().unwrap_or(spec.base_url),
            if keyed { "yes" } else { "no" },
            roles.join(",")
        );
    }
}
