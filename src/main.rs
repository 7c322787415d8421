//! Command-line driver: provision a profile, or fetch and save one image.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use s2fetch::{
    BBox, Client, DEFAULT_PROFILE, Evalscript, ImageRequest, SampleType, TimeInterval,
    download_image, provision, show_image,
};

#[derive(Parser, Debug)]
#[command(name = "s2fetch", version)]
#[command(about = "Fetch a Sentinel-2 tile from Sentinel Hub and save it as NPY, JPEG and 16-bit TIFF")]
struct Cli {
    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store SH_CLIENT_ID / SH_CLIENT_SECRET and the CDSE endpoints in a profile
    Configure {
        /// Profile name
        #[arg(long, env = "S2FETCH_PROFILE", default_value = DEFAULT_PROFILE)]
        profile: String,
    },
    /// Download one image and write <output>.npy, <output>.jpg and <output>.tif
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Bounding box as min_lon,min_lat,max_lon,max_lat (WGS84)
    #[arg(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        default_values_t = [15.461282, 46.757161, 15.574922, 46.851514]
    )]
    bbox: Vec<f64>,

    /// First day of the time window (YYYY-MM-DD)
    #[arg(long, default_value = "2022-07-01")]
    from: String,

    /// Last day of the time window (YYYY-MM-DD), inclusive
    #[arg(long, default_value = "2022-07-20")]
    to: String,

    /// Bands in output channel order
    #[arg(long, value_delimiter = ',', default_values = ["B02", "B03", "B04"])]
    bands: Vec<String>,

    /// Ground sample distance in meters
    #[arg(long, default_value_t = 10.0)]
    resolution: f64,

    /// Output path without extension
    #[arg(short, long, default_value = "data/s2_truecolor")]
    output: PathBuf,

    /// Profile name
    #[arg(long, env = "S2FETCH_PROFILE", default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Sample type rendered by the provider (AUTO, UINT8, UINT16, FLOAT32)
    #[arg(long, default_value = "AUTO")]
    sample_type: String,

    /// Open a window with the normalized image after saving
    #[arg(long)]
    show: bool,

    /// Window title used with --show
    #[arg(long, default_value = "True Color Sentinel-2 Image")]
    title: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Configure { profile } => {
            let config = provision(&profile)?;
            info!(profile = %profile, base_url = %config.base_url, "profile ready");
            Ok(())
        }
        Command::Fetch(args) => fetch(args),
    }
}

fn fetch(args: FetchArgs) -> Result<()> {
    let coords: [f64; 4] = match args.bbox.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        other => bail!("--bbox needs exactly 4 values, got {}", other.len()),
    };

    let evalscript = Evalscript::builder()
        .bands(&args.bands)
        .sample_type(args.sample_type.parse::<SampleType>()?)
        .build()?;
    let request = ImageRequest::new(
        BBox::new(coords)?,
        TimeInterval::parse(&args.from, &args.to)?,
        evalscript,
        args.resolution,
    );

    let client = Client::from_profile(&args.profile)?
        .with_timeout(Duration::from_secs(args.timeout))
        .with_progress(!args.no_progress);

    // Saved paths are reported by the `save_all` log events.
    let (image, _) = download_image(&client, &request, &args.output)?;

    if args.show {
        show_image(&image, &args.title)?;
    }
    Ok(())
}
