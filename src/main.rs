use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::{Path, PathBuf};

use ndvi_stac::collection::catalog_from_directory;
use ndvi_stac::image_selection::{image_selection_toml, ImageSelection};
use ndvi_stac::item::OnReadError;
use ndvi_stac::openeo::{self, OpenEo};
use ndvi_stac::stac_operations;

#[derive(Parser, Debug)]
#[command(name = "ndvi-stac")]
#[command(about = "Fetch Sentinel-2 NDVI rasters from openEO and catalog them as STAC")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the template image selection
    Template {
        #[arg(value_name = "FILE", default_value = "./inputs/image_selection.toml")]
        path: PathBuf,
    },
    /// Run the NDVI job and download its rasters
    Fetch {
        #[arg(short, long, default_value = "./inputs/image_selection.toml")]
        selection: PathBuf,
        #[arg(short, long, default_value = "./ndvi_images")]
        output: PathBuf,
    },
    /// Build a STAC catalog from a directory of NDVI rasters
    Catalog {
        #[arg(short, long, default_value = "./inputs/image_selection.toml")]
        selection: PathBuf,
        #[arg(short, long, default_value = "./ndvi_images")]
        input: PathBuf,
        #[arg(short, long, default_value = "./stac")]
        output: PathBuf,
        /// Log and skip rasters that cannot be read instead of aborting
        #[arg(long)]
        skip_unreadable: bool,
    },
    /// Fetch, then catalog
    Run {
        #[arg(short, long, default_value = "./inputs/image_selection.toml")]
        selection: PathBuf,
        #[arg(long, default_value = "./ndvi_images")]
        images: PathBuf,
        #[arg(short, long, default_value = "./stac")]
        output: PathBuf,
        #[arg(long)]
        skip_unreadable: bool,
    },
}

fn read_selection(path: &Path) -> Result<ImageSelection> {
    ImageSelection::read(path).with_context(|| format!("Failed to read selection {:?}", path))
}

async fn fetch(selection: &ImageSelection, output: &Path) -> Result<()> {
    let provider = OpenEo::from_selection(selection)?;
    let files = openeo::fetch_ndvi(&provider, selection, output).await?;
    info!("Downloaded {} files into {:?}", files.len(), output);
    Ok(())
}

fn catalog(
    selection: &ImageSelection,
    input: &Path,
    output: &Path,
    skip_unreadable: bool,
) -> Result<()> {
    let on_read_error = if skip_unreadable {
        OnReadError::Skip
    } else {
        OnReadError::Abort
    };
    // Absolute asset hrefs stay valid from wherever the item files end up.
    let input = input
        .canonicalize()
        .with_context(|| format!("Input directory {:?} is not accessible", input))?;

    let (catalog, report) = catalog_from_directory(selection, &input, on_read_error)?;
    info!(
        "Built {} items ({} without date, {} unreadable, {} duplicate)",
        report.added,
        report.skipped_no_date.len(),
        report.skipped_unreadable.len(),
        report.skipped_duplicate.len()
    );

    let catalog_path = stac_operations::write_catalog(&catalog, output)?;
    info!("Catalog written to {:?}", catalog_path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Command::Template { path } => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            ImageSelection::from_template(&image_selection_toml())?.write(&path)?;
            info!("Template written to {:?}", path);
        }
        Command::Fetch { selection, output } => {
            let selection = read_selection(&selection)?;
            fetch(&selection, &output).await?;
        }
        Command::Catalog {
            selection,
            input,
            output,
            skip_unreadable,
        } => {
            let selection = read_selection(&selection)?;
            catalog(&selection, &input, &output, skip_unreadable)?;
        }
        Command::Run {
            selection,
            images,
            output,
            skip_unreadable,
        } => {
            let selection = read_selection(&selection)?;
            fetch(&selection, &images).await?;
            catalog(&selection, &images, &output, skip_unreadable)?;
        }
    }

    Ok(())
}
