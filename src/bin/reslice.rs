use clap::Parser;
use register_image::{
    axis_codes, reslice, AxisConvention, Interpolation, PipelineConfig, PipelineError,
    TransformSpace, DEFAULT_FILL_VALUE,
};
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::PathBuf;
use tracing::{error, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("{}", source))]
    Reslice {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}

#[derive(Parser, Debug)]
#[command(author = "FNNDSC", version = env!("CARGO_PKG_VERSION"), about = "Resample a moving image onto a fixed image's grid through an existing transform matrix", long_about = None)]
struct Args {
    #[arg(help = "Moving image (NIfTI)")]
    moving: PathBuf,

    #[arg(help = "Fixed image (NIfTI) defining the output grid")]
    fixed: PathBuf,

    #[arg(help = "Transform matrix mapping moving to fixed")]
    transform: PathBuf,

    #[arg(help = "Output image (NIfTI)")]
    output: PathBuf,

    #[arg(
        help = "Interpolation",
        long = "interpolation",
        short = 'i',
        value_parser = clap::value_parser!(Interpolation),
        default_value_t = Interpolation::default(),
    )]
    interpolation: Interpolation,

    #[arg(
        help = "Coordinate space of the transform matrix",
        long = "transform-space",
        value_parser = clap::value_parser!(TransformSpace),
        default_value_t = TransformSpace::default(),
    )]
    transform_space: TransformSpace,

    #[arg(
        help = "Value for output voxels outside the moving image",
        long = "fill-value",
        default_value_t = DEFAULT_FILL_VALUE
    )]
    fill_value: f32,

    #[arg(
        help = "Reorient the output to an axis convention (LAS when given without a value)",
        long = "reorient",
        num_args = 0..=1,
        default_missing_value = "LAS"
    )]
    reorient: Option<AxisConvention>,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

fn run(args: Args) -> Result<(), Error> {
    let config = PipelineConfig {
        reorient: args.reorient,
        reslice: Some(args.interpolation),
        transform_space: args.transform_space,
        fill_value: args.fill_value,
        ..Default::default()
    };
    let volume = reslice(
        &args.moving,
        &args.fixed,
        &args.transform,
        &args.output,
        args.interpolation,
        &config,
    )
    .context(ResliceSnafu)?;

    let orientation = axis_codes(volume.affine()).unwrap_or_else(|_| "oblique".to_string());
    println!(
        "Resliced image saved to {} (shape {:?}, {})",
        args.output.display(),
        volume.data().shape(),
        orientation
    );
    Ok(())
}
