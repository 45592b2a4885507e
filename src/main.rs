//! blobdemo CLI - drives the blob facade from the command line
//!
//! `demo` replays the scripted walkthrough: upload five copies of a picture,
//! list, batch-delete, list again, then round-trip the sample catalog. The
//! other subcommands expose one facade operation each.

use anyhow::Context;
use blobdemo::{
    AccessTier, BlobBackend, BlobService, Catalog, Category, Config, Container, MemoryBackend,
    Metadata, Product,
};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "blobdemo")]
#[command(about = "Walk through the basics of a cloud blob store")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file (defaults to ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(short, long, global = true, default_value = "azure")]
    backend: BackendKind,

    /// Output format (json or text)
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Container to operate on
    #[arg(short, long, global = true, default_value = "temp")]
    container: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum BackendKind {
    /// Azure Blob Storage or Azurite, per the configured connection string
    Azure,
    /// In-process store that lives for one invocation
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted walkthrough
    Demo {
        /// Picture to copy and upload
        #[arg(short, long, default_value = "bear.jpg")]
        source: PathBuf,
        /// Number of copies to upload
        #[arg(short = 'n', long, default_value = "5")]
        copies: usize,
    },

    // === Blob Commands ===
    /// Upload a local file (blob name is the file name)
    Upload {
        /// Local file path
        path: PathBuf,
    },

    /// List the blobs in the container
    List,

    /// Change a blob's access tier
    Tier {
        /// Blob name
        name: String,
        /// hot, cool, cold or archive
        tier: AccessTier,
    },

    /// Replace a blob's metadata
    Metadata {
        /// Blob name
        name: String,
        /// Entries as key=value
        #[arg(value_parser = parse_key_value)]
        entries: Vec<(String, String)>,
    },

    /// Show a blob's properties and metadata
    Properties {
        /// Blob name
        name: String,
    },

    /// Delete a blob if it exists
    Delete {
        /// Blob name
        name: String,
    },

    /// Delete several blobs in one batch
    DeleteMany {
        /// Blob names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Take a snapshot of a blob
    Snapshot {
        /// Blob name
        name: String,
    },

    /// Issue a read+write shared access URI for a blob
    Sas {
        /// Blob name
        name: String,
        /// Lifetime in minutes
        #[arg(short, long, default_value = "10")]
        minutes: u64,
    },

    /// Download a blob into a local directory
    Download {
        /// Blob name
        name: String,
        /// Destination directory
        #[arg(short, long, default_value = blobdemo::DEFAULT_DOWNLOAD_DIR)]
        dir: PathBuf,
    },

    // === Catalog Commands ===
    /// Write the sample categories and products as JSON blobs
    WriteCatalog,

    /// Read the catalog blobs back and print products with their categories
    ReadCatalog,
}

const CATEGORIES_BLOB: &str = "categories.json";
const PRODUCTS_BLOB: &str = "products.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobdemo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let service = BlobService::from_backend(open_backend(&cli)?);
    let container = service.get_or_create_container(&cli.container).await?;

    match cli.command {
        Commands::Demo { source, copies } => {
            run_demo(&service, &container, &source, copies).await?;
        }

        Commands::Upload { path } => {
            let name = service.upload_file(&container, &path).await?;
            match cli.format {
                OutputFormat::Json => output(
                    cli.format,
                    &serde_json::json!({ "status": "ok", "name": name }),
                )?,
                OutputFormat::Text => print_uploaded(&name),
            }
        }

        Commands::List => {
            let blobs = service.collect_blobs(&container).await?;
            match cli.format {
                OutputFormat::Json => output(
                    cli.format,
                    &serde_json::json!({ "count": blobs.len(), "blobs": blobs }),
                )?,
                OutputFormat::Text => print!("{}", blobdemo::report::listing_table(&blobs)),
            }
        }

        Commands::Tier { name, tier } => {
            service.set_access_tier(&container, &name, tier).await?;
            output(
                cli.format,
                &serde_json::json!({ "status": "ok", "name": name, "tier": tier }),
            )?;
        }

        Commands::Metadata { name, entries } => {
            let metadata: Metadata = entries.into_iter().collect();
            service.set_metadata(&container, &name, &metadata).await?;
            output(
                cli.format,
                &serde_json::json!({ "status": "ok", "name": name, "metadata": metadata }),
            )?;
        }

        Commands::Properties { name } => {
            let properties = service.blob_properties(&container, &name).await?;
            output(cli.format, &serde_json::to_value(properties)?)?;
        }

        Commands::Delete { name } => {
            let deleted = service.delete_blob(&container, &name).await?;
            output(
                cli.format,
                &serde_json::json!({ "status": "ok", "name": name, "deleted": deleted }),
            )?;
        }

        Commands::DeleteMany { names } => {
            let outcomes = service.delete_blobs(&container, &names).await?;
            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            output(
                cli.format,
                &serde_json::json!({
                    "status": if failed == 0 { "ok" } else { "partial" },
                    "results": outcomes
                }),
            )?;
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Snapshot { name } => {
            let snapshot = service.snapshot_blob(&container, &name).await?;
            output(cli.format, &serde_json::to_value(snapshot)?)?;
        }

        Commands::Sas { name, minutes } => {
            let ttl = minutes
                .checked_mul(60)
                .map(Duration::from_secs)
                .with_context(|| format!("--minutes {} is too large", minutes))?;
            let uri = service
                .issue_shared_access_uri_with_ttl(&container, &name, ttl)
                .await?;
            match cli.format {
                OutputFormat::Json => output(
                    cli.format,
                    &serde_json::json!({ "name": name, "uri": uri.as_str() }),
                )?,
                OutputFormat::Text => println!("{}", uri),
            }
        }

        Commands::Download { name, dir } => {
            let path = service.download_file_to(&container, &name, &dir).await?;
            output(
                cli.format,
                &serde_json::json!({ "status": "ok", "path": path.display().to_string() }),
            )?;
        }

        Commands::WriteCatalog => {
            write_catalog(&service, &container, &Catalog::sample()).await;
        }

        Commands::ReadCatalog => {
            if let Some(catalog) = read_catalog(&service, &container).await {
                print_catalog(&catalog);
            }
        }
    }

    Ok(())
}

fn open_backend(cli: &Cli) -> anyhow::Result<Arc<dyn BlobBackend>> {
    match cli.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "azure")]
        BackendKind::Azure => {
            let config = Config::load(cli.config.as_deref())?;
            let backend =
                blobdemo::AzureBackend::from_connection_string(&config.connection_string, config.timeout)
                    .context("Failed to set up the Azure backend")?;
            tracing::debug!(endpoint = %backend.endpoint(), "using azure backend");
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "azure"))]
        BackendKind::Azure => {
            let _ = Config::load(cli.config.as_deref())?;
            anyhow::bail!("this build has no Azure support; rebuild with --features azure or use --backend memory")
        }
    }
}

async fn run_demo(
    service: &BlobService,
    container: &Container,
    source: &Path,
    copies: usize,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        source.is_file(),
        "Source picture {} not found",
        source.display()
    );
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("blob");
    let extension = source
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut names = Vec::with_capacity(copies);
    for i in 0..copies {
        let copy = dir.join(format!("{}{}{}", stem, i, extension));
        tokio::fs::copy(source, &copy)
            .await
            .with_context(|| format!("Failed to copy {} to {}", source.display(), copy.display()))?;
        let name = service.upload_file(container, &copy).await?;
        print_uploaded(&name);
        names.push(name);
    }

    display_blobs(service, container).await?;

    let outcomes = service.delete_blobs(container, &names).await?;
    for outcome in outcomes.iter().filter(|o| !o.is_success()) {
        println!("{}", format!("Failed to delete {}: {:?}", outcome.name, outcome.status).red());
    }

    println!("{}", blobdemo::report::separator());
    display_blobs(service, container).await?;

    println!("{}", blobdemo::report::separator());
    write_catalog(service, container, &Catalog::sample()).await;
    if let Some(catalog) = read_catalog(service, container).await {
        print_catalog(&catalog);
    }
    Ok(())
}

fn print_uploaded(name: &str) {
    println!("Blob '{}' was uploaded", name);
}

async fn display_blobs(service: &BlobService, container: &Container) -> anyhow::Result<()> {
    let blobs = service.collect_blobs(container).await?;
    print!("{}", blobdemo::report::listing_table(&blobs));
    Ok(())
}

/// Write both catalog blobs, reporting each outcome in color
async fn write_catalog(service: &BlobService, container: &Container, catalog: &Catalog) {
    match service
        .write_objects(&catalog.categories, CATEGORIES_BLOB, container)
        .await
    {
        Ok(()) => println!("{}", "Categories written successfully".green()),
        Err(e) => println!("{}", format!("Failed to write categories: {}", e).red()),
    }
    match service
        .write_objects(&catalog.products, PRODUCTS_BLOB, container)
        .await
    {
        Ok(()) => println!("{}", "Products written successfully".green()),
        Err(e) => println!("{}", format!("Failed to write products: {}", e).red()),
    }
}

async fn read_catalog(service: &BlobService, container: &Container) -> Option<Catalog> {
    let categories = match service
        .read_objects::<Category>(CATEGORIES_BLOB, container)
        .await
    {
        Ok(categories) => categories,
        Err(e) => {
            println!("{}", format!("Failed to read categories: {}", e).red());
            return None;
        }
    };
    let products = match service.read_objects::<Product>(PRODUCTS_BLOB, container).await {
        Ok(products) => products,
        Err(e) => {
            println!("{}", format!("Failed to read products: {}", e).red());
            return None;
        }
    };
    Some(Catalog::new(categories, products))
}

fn print_catalog(catalog: &Catalog) {
    for (product, category) in catalog.join() {
        let category = category.map(|c| c.name.as_str()).unwrap_or("?");
        println!(
            "{} {} ({}) {:.2}",
            product.id, product.name, category, product.price
        );
    }
    let orphans = catalog.orphans().len();
    if orphans > 0 {
        println!("{}", format!("{} products reference unknown categories", orphans).red());
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
