//! marginalia CLI: annotate an EPUB with generated commentary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;

use marginalia::annotate::model::slug_for;
use marginalia::config::MarginaliaConfig;
use marginalia::container;
use marginalia::document::{DocumentPipeline, list_chapters};
use marginalia::remote::Generator;
use marginalia::remote::openai::OpenAiBackend;
use marginalia::store::CacheStore;

#[derive(Parser)]
#[command(name = "marginalia", version, about = "Annotate EPUB chapters with generated content")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate every chapter of a book.
    Annotate {
        /// Input EPUB.
        input: PathBuf,

        /// Output EPUB [default: <input>.annotated.epub].
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Directory to unpack into [default: <input>.work].
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Cache database, overriding `pipeline.cache_path`.
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Chapter workers, overriding `pipeline.workers`.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List the chapters that would be annotated, in order.
    Chapters {
        /// Input EPUB.
        input: PathBuf,

        /// Directory to unpack into [default: <input>.work].
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MarginaliaConfig::load(path)?,
        None => MarginaliaConfig::default(),
    };

    match cli.command {
        Commands::Annotate {
            input,
            output,
            work_dir,
            cache,
            workers,
        } => {
            if let Some(cache) = cache {
                config.pipeline.cache_path = cache;
            }
            if let Some(workers) = workers {
                config.pipeline.workers = workers;
            }
            config.validate()?;

            let output = output.unwrap_or_else(|| sibling(&input, "annotated.epub"));
            let work_dir = work_dir.unwrap_or_else(|| sibling(&input, "work"));

            // Opened before anything else: without the cache every rerun pays again.
            let cache = CacheStore::open(&config.pipeline.cache_path)?;
            let generator = Generator::new(OpenAiBackend::from_env(config.remote.clone())?);

            let result = DocumentPipeline::new(&config, &generator, &cache).run(&input, &work_dir, &output);
            cache.close();
            let report = result?;

            println!("{report}");
            println!("Wrote {}", output.display());
        }

        Commands::Chapters { input, work_dir } => {
            let work_dir = work_dir.unwrap_or_else(|| sibling(&input, "work"));
            container::unpack(&input, &work_dir)?;
            let text_dir = config.layout.content_root(&work_dir).join(&config.layout.text_dir);
            for path in list_chapters(&text_dir, &config.layout.chapter_prefix)? {
                println!("{}", slug_for(&path));
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// `book.epub` → `book.{suffix}` next to it.
fn sibling(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".into());
    input.with_file_name(format!("{stem}.{suffix}"))
}

