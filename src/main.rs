use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use webpify::{FsStore, Manifest, Pipeline, SourceImage, config, logging, naming, output, pipeline};

#[derive(Parser)]
#[command(name = "webpify")]
#[command(about = "Convert JPEG/PNG uploads into WebP derivatives")]
#[command(long_about = "\
Convert JPEG/PNG uploads into WebP derivatives

Each input file becomes a full-size WebP plus one resized WebP per configured
width, written under <storage.root>/<dir>/ as a single unit: either every file
of an image is written or none is.

  public/images/
  ├── Beach_Day_9f2c41d07a3b4e55.webp             # full size
  ├── Beach_Day_9f2c41d07a3b4e55_thumbnail.webp   # 150px wide
  ├── Beach_Day_9f2c41d07a3b4e55_medium.webp      # 500px wide
  ├── Beach_Day_9f2c41d07a3b4e55_large.webp       # 1200px wide
  └── Beach_Day_9f2c41d07a3b4e55.jpg              # original (keep_original)

Run 'webpify gen-config' to generate a documented webp.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log every pipeline stage
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert image files and store their derivatives
    Convert {
        /// JPEG or PNG files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Storage directory (relative to storage.root)
        #[arg(long, default_value = "images")]
        dir: String,

        /// Base name hint (default: each file's stem)
        #[arg(long)]
        name: Option<String>,

        /// Print manifests as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate the config file and show the effective settings
    Check,
    /// Print a stock webp.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_subscriber(cli.verbose)?;

    match cli.command {
        Command::Convert {
            files,
            dir,
            name,
            json,
        } => {
            let config = config::load_config(&cli.config)?;
            let store = FsStore::new(&config.storage.root, &config.storage.base_url);
            let pipeline = Pipeline::new(&store).with_workers(config::effective_threads(&config.processing));

            let mut manifests = Vec::with_capacity(files.len());
            let mut failed = 0;
            for (i, file) in files.iter().enumerate() {
                let label = file.display().to_string();
                match convert_file(&pipeline, &config.webp, file, &dir, name.as_deref()) {
                    Ok(manifest) => {
                        if !json {
                            output::print_manifest(i + 1, &label, &manifest, &store);
                        }
                        manifests.push(manifest);
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::debug!(file = %label, error = ?e, "conversion failed");
                        output::print_failure(i + 1, &label, e.as_ref());
                    }
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&manifests)?);
            }
            if failed > 0 {
                return Err(format!("{failed} of {} files failed", files.len()).into());
            }
        }
        Command::Check => {
            println!("==> Checking {}", cli.config.display());
            let config = config::load_config(&cli.config)?;
            output::print_config(&config);
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Read one file and run it through the pipeline.
///
/// The declared format comes from the extension and is checked against the
/// policy before the file is read.
fn convert_file(
    pipeline: &Pipeline<'_>,
    policy: &config::Policy,
    file: &Path,
    dir: &str,
    name: Option<&str>,
) -> Result<Manifest, Box<dyn std::error::Error>> {
    let filename = file.to_string_lossy();
    let extension = naming::file_extension(&filename).unwrap_or_default();
    let format = pipeline::format_for_extension(extension, policy)?;
    let bytes = std::fs::read(file)?;
    let hint = name.unwrap_or_else(|| naming::file_stem(&filename));
    Ok(pipeline.convert(&SourceImage::new(bytes, format), dir, hint, policy)?)
}
