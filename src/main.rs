use anyhow::Result;
use clap::Parser;
use comicpress::config::{ConvertParams, RunConfig, UnsharpMask};
use comicpress::coordinator::{Coordinator, RunOutcome};
use comicpress::engine::Engine;
use comicpress::logging::{init_logging, LogConfig};
use comicpress::report;
use comicpress::CancelToken;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "comicpress")]
#[command(version, about = "Batch comic-page converter driving GraphicsMagick", long_about = None)]
struct Cli {
    /// Input root; every immediate subdirectory with supported images
    /// (jpg, jpeg, png, webp, bmp) is converted.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output root; defaults to `<INPUT>/converted`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Images at least this wide are split into left/right pages.
    #[arg(long, default_value_t = 2000)]
    width_threshold: u32,

    /// Target output height in pixels.
    #[arg(long, default_value_t = 1600)]
    height: u32,

    /// JPEG quality, 1-100.
    #[arg(short, long, default_value_t = 85)]
    quality: u8,

    /// Convert pages to grayscale.
    #[arg(long)]
    grayscale: bool,

    /// Disable the unsharp mask.
    #[arg(long)]
    no_sharpen: bool,

    #[arg(long, default_value_t = 0.0)]
    sharpen_radius: f32,

    #[arg(long, default_value_t = 1.0)]
    sharpen_sigma: f32,

    #[arg(long, default_value_t = 0.8)]
    sharpen_amount: f32,

    #[arg(long, default_value_t = 0.016)]
    sharpen_threshold: f32,

    /// Worker count; auto-computed from the image count when omitted.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Images per batch; auto-computed when omitted.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Print the summary as JSON instead of the boxed report.
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Also write a daily-rotated log file into this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let _log_guard = init_logging(
        "comicpress",
        LogConfig::default()
            .with_level(level)
            .with_log_dir(cli.log_dir.as_ref()),
    )?;

    // Missing engine is a fatal precondition: fail before scanning anything.
    let engine = Engine::locate()?;
    engine.verify()?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\ninterrupt received, cancelling run…");
            cancel.cancel();
        })?;
    }

    let output_root = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.join("converted"));
    let config = RunConfig {
        input_root: cli.input.clone(),
        output_root,
        params: ConvertParams {
            width_threshold: cli.width_threshold,
            resize_height: cli.height,
            quality: cli.quality.clamp(1, 100),
            grayscale: cli.grayscale,
            unsharp: if cli.no_sharpen {
                None
            } else {
                Some(UnsharpMask {
                    radius: cli.sharpen_radius,
                    sigma: cli.sharpen_sigma,
                    amount: cli.sharpen_amount,
                    threshold: cli.sharpen_threshold,
                })
            },
        },
        workers: cli.workers,
        batch_size: cli.batch_size,
    };

    let coordinator = Coordinator::new(engine, config);
    match coordinator.run(&cancel)? {
        RunOutcome::Completed(summary) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary.to_json())?);
            } else {
                report::print_summary(&summary);
            }
            if !summary.failed.is_empty() {
                std::process::exit(1);
            }
        }
        RunOutcome::Cancelled => {
            eprintln!("run cancelled; partial output may remain in the output directory");
            std::process::exit(130);
        }
    }

    Ok(())
}
