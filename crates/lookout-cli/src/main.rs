use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lookout_core::{GalleryStore, Identity, ImageRef};
use lookout_engine::Config;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lookout", about = "Manage the Lookout face gallery")]
struct Cli {
    /// Gallery store file (overrides LOOKOUT_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add images for a person, merging with an existing label (case-insensitive)
    Add {
        /// Person label, e.g. "Alice"
        label: String,
        /// Image files to add
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Store file paths instead of embedding the image data
        #[arg(long)]
        by_path: bool,
    },
    /// List labeled identities
    List {
        /// Print the gallery as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an identity by its list index
    Remove { index: usize },
    /// Remove one image; removing the last image removes the identity
    RemoveImage { identity: usize, image: usize },
    /// Rewrite the store in the current record format
    Migrate,
    /// Show effective configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.store {
        config.store_path = path;
    }
    config.validate().context("invalid configuration")?;

    tracing::debug!(store = %config.store_path.display(), "using gallery store");
    let store = GalleryStore::open(&config.store_path);

    match cli.command {
        Commands::Add {
            label,
            images,
            by_path,
        } => {
            let refs = images
                .iter()
                .map(|path| image_ref_for(path, by_path))
                .collect::<Result<Vec<_>>>()?;
            let count = refs.len();
            let gallery = store.add_images(&label, refs)?;
            let identity = gallery
                .iter()
                .find(|i| i.label.to_lowercase() == label.trim().to_lowercase())
                .context("identity missing after upload")?;
            println!(
                "Added {count} image(s) to '{}' ({} total)",
                identity.label,
                identity.images.len()
            );
        }
        Commands::List { json } => {
            let gallery = store.load();
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries(&gallery))?);
            } else if gallery.is_empty() {
                println!("Gallery is empty");
            } else {
                print_gallery(&gallery);
            }
        }
        Commands::Remove { index } => {
            let gallery = store.remove_identity(index)?;
            println!("Removed identity {index}; {} remaining", gallery.len());
        }
        Commands::RemoveImage { identity, image } => {
            let before = store.load().len();
            let gallery = store.remove_image(identity, image)?;
            if gallery.len() < before {
                println!("Removed last image; identity {identity} deleted");
            } else {
                println!("Removed image {image} from identity {identity}");
            }
        }
        Commands::Migrate => {
            let report = store.migrate()?;
            if report.is_clean() {
                println!("Store already up to date ({} records)", report.records);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Config => {
            println!("store:           {}", config.store_path.display());
            println!("match threshold: {}", config.match_threshold);
            println!("tick interval:   {} ms", config.tick_interval_ms);
        }
    }

    Ok(())
}

/// Read an image file into a gallery reference, refusing non-images.
fn image_ref_for(path: &Path, by_path: bool) -> Result<ImageRef> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a recognized image", path.display()))?;

    if by_path {
        let absolute = std::fs::canonicalize(path)
            .with_context(|| format!("resolving {}", path.display()))?;
        return Ok(ImageRef::new(absolute.to_string_lossy().into_owned()));
    }

    let mime = format.to_mime_type();
    if !mime.starts_with("image/") {
        bail!("{} has unsupported type {mime}", path.display());
    }
    Ok(ImageRef::from_bytes(&bytes, mime))
}

fn summaries(gallery: &[Identity]) -> Vec<serde_json::Value> {
    gallery
        .iter()
        .enumerate()
        .map(|(index, identity)| {
            serde_json::json!({
                "index": index,
                "label": identity.label,
                "images": identity.images.len(),
                "inline": identity.images.iter().filter(|i| i.is_inline()).count(),
            })
        })
        .collect()
}

fn print_gallery(gallery: &[Identity]) {
    println!("{:>5}  {:<24} {:>6}", "INDEX", "LABEL", "IMAGES");
    for (index, identity) in gallery.iter().enumerate() {
        println!("{index:>5}  {:<24} {:>6}", identity.label, identity.images.len());
    }
}
