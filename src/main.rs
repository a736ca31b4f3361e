use std::{env, io, path::PathBuf, process::ExitCode};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use md2epub::{
    builder::navigation::DEFAULT_TOC_TITLE,
    container::DEFAULT_COMPRESSION_LEVEL,
    error::{ConfigError, EpubError},
    pipeline::{ConvertOptions, convert},
    template::create_template,
};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "MD2EPUB_LOG";

/// Assemble a directory of Markdown chapters into an EPUB 3 file
#[derive(Parser)]
#[command(name = "md2epub", version)]
struct Cli {
    /// Log every stage of the conversion
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a Markdown project into an EPUB file
    Convert(ConvertArgs),

    /// Create a new project from the built-in template
    Init {
        /// Directory to create
        directory: PathBuf,
    },
}

#[derive(Args)]
struct ConvertArgs {
    /// Project directory holding description.json, the chapters, images/ and css/
    markdown_directory: PathBuf,

    /// EPUB file to write
    output_file: PathBuf,

    /// Convert every image to grayscale
    #[arg(long)]
    gray_images: bool,

    /// Re-encode JPEG images at this quality (1-100)
    #[arg(long, value_name = "N")]
    jpeg_quality: Option<u8>,

    /// Recompress PNG images and the container with zopflipng and advzip
    #[arg(long)]
    zopfli: bool,

    /// DEFLATE level of the container entries (0-9, 0 stores them uncompressed)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compression_level: i64,

    /// Heading of the table of contents
    #[arg(long, value_name = "T", default_value = DEFAULT_TOC_TITLE)]
    toc_title: String,

    /// Leave matching asset files out, by name or `*.ext`
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Image optimizer threads, 0 for one per core
    #[arg(long, value_name = "N", default_value_t = 0)]
    jobs: usize,
}

impl ConvertArgs {
    fn options(&self) -> Result<ConvertOptions, EpubError> {
        let mut options = ConvertOptions::default();
        options
            .set_compression_level(self.compression_level)
            .set_toc_title(&self.toc_title)
            .set_modified(source_date_epoch()?);

        options
            .optimizer
            .set_grayscale(self.gray_images)
            .set_jpeg_quality(self.jpeg_quality)
            .set_zopfli(self.zopfli)
            .set_jobs(self.jobs);

        for pattern in &self.exclude {
            options.catalog.add_exclude(pattern);
        }

        Ok(options)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}: {}", err.kind(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), EpubError> {
    match &cli.command {
        // the summary is logged by the library
        Command::Convert(args) => {
            convert(&args.markdown_directory, &args.output_file, &args.options()?)?;
        }

        Command::Init { directory } => create_template(directory)?,
    }

    Ok(())
}

/// Sends `log` records to stderr
///
/// The flags win over the environment filter.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("md2epub=debug")
    } else if quiet {
        EnvFilter::new("md2epub=warn")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("md2epub=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Reads the reproducible build timestamp, if any
fn source_date_epoch() -> Result<Option<DateTime<Utc>>, EpubError> {
    let Ok(value) = env::var("SOURCE_DATE_EPOCH") else {
        return Ok(None);
    };

    let invalid = |reason: String| ConfigError::InvalidOption {
        option: "SOURCE_DATE_EPOCH".to_string(),
        reason,
    };

    let seconds = value
        .trim()
        .parse::<i64>()
        .map_err(|err| invalid(err.to_string()))?;

    match DateTime::from_timestamp(seconds, 0) {
        Some(modified) => Ok(Some(modified)),
        None => Err(invalid(format!("{} is out of range", seconds)).into()),
    }
}
