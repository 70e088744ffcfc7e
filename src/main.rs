use clap::Parser;
use register_image::file::default_spinner;
use register_image::registration::{CostFunction, DegreesOfFreedom, Flirt};
use register_image::{
    AxisConvention, Interpolation, PipelineConfig, PipelineError, PipelinePaths,
    RegistrationPipeline, TransformSpace, DEFAULT_FILL_VALUE,
};
use snafu::{ensure, Report, ResultExt, Snafu, Whatever};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, Level};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid input directory: {}", path.display()))]
    InvalidInputDir { path: PathBuf },

    #[snafu(display("Input image not found: {}", path.display()))]
    MissingInput { path: PathBuf },

    #[snafu(display("{}", source))]
    Pipeline {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}

#[derive(Parser, Debug)]
#[command(author = "FNNDSC", version = env!("CARGO_PKG_VERSION"), about = "Register a moving 3D image (CT, MRI, PET, etc) onto a fixed image with FSL FLIRT, saving the registered image and the transform matrix", long_about = None)]
struct Args {
    #[arg(help = "Input directory containing the fixed and moving images")]
    input_dir: PathBuf,

    #[arg(help = "Output directory for the registered image and transform matrix")]
    output_dir: PathBuf,

    #[arg(
        help = "Fixed image, relative to the input directory",
        long = "fixed-image",
        default_value = "fixed_image.nii.gz"
    )]
    fixed_image: PathBuf,

    #[arg(
        help = "Moving image, relative to the input directory",
        long = "moving-image",
        default_value = "moving_image.nii.gz"
    )]
    moving_image: PathBuf,

    #[arg(
        help = "Registered moving image, relative to the output directory",
        long = "registered-moving-image",
        default_value = "registered_moving_image.nii.gz"
    )]
    registered_moving_image: PathBuf,

    #[arg(
        help = "Transformation matrix, relative to the output directory",
        long = "transform-matrix",
        default_value = "transform.mat"
    )]
    transform_matrix: PathBuf,

    #[arg(
        help = "Resliced moving image, relative to the output directory (written with --reslice)",
        long = "resliced-moving-image",
        default_value = "resliced_moving_image.nii.gz"
    )]
    resliced_moving_image: PathBuf,

    #[arg(
        help = "Degrees of freedom (6 = rigid)",
        long = "dof",
        value_parser = clap::value_parser!(DegreesOfFreedom),
        default_value_t = DegreesOfFreedom::default(),
    )]
    dof: DegreesOfFreedom,

    #[arg(
        help = "Cost function",
        long = "cost",
        value_parser = clap::value_parser!(CostFunction),
        default_value_t = CostFunction::default(),
    )]
    cost: CostFunction,

    #[arg(help = "FLIRT executable", long = "flirt", default_value = "flirt")]
    flirt: PathBuf,

    #[arg(
        help = "Terminate registration after this many seconds",
        long = "timeout",
        short = 't'
    )]
    timeout: Option<u64>,

    #[arg(
        help = "Reorient outputs to an axis convention (LAS when given without a value)",
        long = "reorient",
        num_args = 0..=1,
        default_missing_value = "LAS"
    )]
    reorient: Option<AxisConvention>,

    #[arg(
        help = "Also resample the moving image through the transform matrix",
        long = "reslice",
        num_args = 0..=1,
        default_missing_value = "trilinear",
        value_parser = clap::value_parser!(Interpolation),
    )]
    reslice: Option<Interpolation>,

    #[arg(
        help = "Coordinate space of the transform matrix",
        long = "transform-space",
        value_parser = clap::value_parser!(TransformSpace),
        default_value_t = TransformSpace::default(),
    )]
    transform_space: TransformSpace,

    #[arg(
        help = "Value for resliced voxels outside the moving image",
        long = "fill-value",
        default_value_t = DEFAULT_FILL_VALUE
    )]
    fill_value: f32,

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
    ensure!(
        args.input_dir.is_dir(),
        InvalidInputDirSnafu {
            path: args.input_dir
        }
    );
    let paths = PipelinePaths {
        fixed: args.input_dir.join(&args.fixed_image),
        moving: args.input_dir.join(&args.moving_image),
        registered: args.output_dir.join(&args.registered_moving_image),
        transform: args.output_dir.join(&args.transform_matrix),
        resliced: args.output_dir.join(&args.resliced_moving_image),
    };
    for path in [&paths.fixed, &paths.moving] {
        ensure!(path.is_file(), MissingInputSnafu { path });
    }

    let flirt = Flirt::new(&args.flirt).with_timeout(args.timeout.map(Duration::from_secs));
    let config = PipelineConfig {
        dof: args.dof,
        cost: args.cost,
        reorient: args.reorient,
        reslice: args.reslice,
        transform_space: args.transform_space,
        fill_value: args.fill_value,
    };
    tracing::info!("Configuration: {:?}", config);
    let pipeline = RegistrationPipeline::new(flirt, config);

    let spinner = default_spinner();
    spinner.set_message(format!(
        "Registering {} onto {}",
        paths.moving.display(),
        paths.fixed.display()
    ));
    let result = pipeline.run(&paths);
    spinner.finish_and_clear();
    let output = result.context(PipelineSnafu)?;

    println!("Registered image saved to {}", output.registered.display());
    println!("Transform matrix saved to {}", paths.transform.display());
    if let Some(resliced) = output.resliced {
        println!("Resliced image saved to {}", resliced.display());
    }
    Ok(())
}
