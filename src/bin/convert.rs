use clap::Parser;
use register_image::file::default_spinner;
use register_image::registration::{ConvertError, Dcm2Niix, DEFAULT_DCM2NIIX_PROGRAM};
use snafu::{ensure, Report, ResultExt, Snafu, Whatever};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid DICOM directory: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("No NIfTI volumes written to {}", path.display()))]
    NoVolumes { path: PathBuf },

    #[snafu(display("{}", source))]
    Convert {
        #[snafu(source(from(ConvertError, Box::new)))]
        source: Box<ConvertError>,
    },
}

#[derive(Parser, Debug)]
#[command(author = "FNNDSC", version = env!("CARGO_PKG_VERSION"), about = "Convert a DICOM series directory to gzipped NIfTI volumes with dcm2niix", long_about = None)]
struct Args {
    #[arg(help = "Directory containing the DICOM files")]
    source: PathBuf,

    #[arg(help = "Output directory for the NIfTI volumes (created if missing)")]
    output: PathBuf,

    #[arg(
        help = "dcm2niix executable",
        long = "dcm2niix",
        default_value = DEFAULT_DCM2NIIX_PROGRAM
    )]
    dcm2niix: PathBuf,

    #[arg(
        help = "Terminate the conversion after this many seconds",
        long = "timeout",
        short = 't'
    )]
    timeout: Option<u64>,

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
        args.source.is_dir(),
        InvalidSourcePathSnafu { path: args.source }
    );

    let converter =
        Dcm2Niix::new(&args.dcm2niix).with_timeout(args.timeout.map(Duration::from_secs));
    let spinner = default_spinner();
    spinner.set_message(format!("Converting {}", args.source.display()));
    let result = converter.convert(&args.source, &args.output);
    spinner.finish_and_clear();

    let volumes = result.context(ConvertSnafu)?;
    ensure!(!volumes.is_empty(), NoVolumesSnafu { path: args.output });
    for volume in volumes {
        println!("{}", volume.display());
    }
    Ok(())
}
