use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::error;

use flop::{AnalyzeRequest, Context, ContextOptions, Tonemap};

#[derive(Parser)]
#[command(name = "flop")]
#[command(about = "Perceptual image difference (FLIP) on the GPU", long_about = None)]
struct Cli {
    /// Reference image (.png, .jpg, .jpeg, .bmp, or .exr)
    #[arg(short, long)]
    reference: PathBuf,

    /// Test image with the same extent as the reference
    #[arg(short, long)]
    test: PathBuf,

    /// Write the color-mapped error map to this PNG
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Exposure in stops applied to HDR sources
    #[arg(short, long, default_value_t = 0.0)]
    exposure: f32,

    /// Tonemapper applied to HDR sources
    #[arg(long, value_enum, default_value = "aces")]
    tonemap: TonemapArg,

    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,

    /// Select the adapter whose name contains this string
    #[arg(long)]
    device: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TonemapArg {
    Aces,
    Reinhard,
    Hable,
}

impl From<TonemapArg> for Tonemap {
    fn from(arg: TonemapArg) -> Tonemap {
        match arg {
            TonemapArg::Aces => Tonemap::Aces,
            TonemapArg::Reinhard => Tonemap::Reinhard,
            TonemapArg::Hable => Tonemap::Hable,
        }
    }
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let options = ContextOptions {
        validation: cli.validation || cfg!(debug_assertions),
        instance_extensions: Vec::new(),
        preferred_device: cli.device,
    };
    let mut context = match Context::new(&options) {
        Ok(context) => context,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let request = AnalyzeRequest {
        reference: cli.reference.as_path(),
        test: cli.test.as_path(),
        output: cli.output.as_deref(),
        exposure_stops: cli.exposure,
        tonemap: Some(cli.tonemap.into()),
    };
    match context.analyze(&request) {
        Ok(summary) => {
            println!(
                "{}x{} analyzed in {} ms",
                summary.width, summary.height, summary.milliseconds_elapsed
            );
            let histogram: Vec<String> =
                summary.histogram.iter().map(u32::to_string).collect();
            println!("Error histogram:\n[{}]", histogram.join(", "));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
