//! Fetch a Sentinel-2 L2A tile from the Sentinel Hub Process API and keep it on disk.
//!
//! The flow is linear: resolve a credential profile, build the request
//! (bounding box, time window, band list, resolution), issue one Process API
//! call for the least-cloudy mosaic, then write the returned raster as a raw
//! `.npy` dump, an 8-bit `.jpg` preview and a 16-bit `.tif`.
//!
//! ## Quick start
//! - Store credentials once with [`provision`] (or `s2fetch configure`), or
//!   export `SH_CLIENT_ID` / `SH_CLIENT_SECRET`.
//! - Build an [`ImageRequest`] and call [`download_image`].
//!
//! ```no_run
//! use anyhow::Result;
//! use s2fetch::{BBox, Client, Evalscript, ImageRequest, TimeInterval};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_profile(s2fetch::DEFAULT_PROFILE)?;
//!     let request = ImageRequest::new(
//!         BBox::new([15.461282, 46.757161, 15.574922, 46.851514])?,
//!         TimeInterval::parse("2022-07-01", "2022-07-20")?,
//!         Evalscript::for_bands(["B02", "B03", "B04"])?,
//!         10.0,
//!     );
//!     let (image, paths) =
//!         s2fetch::download_image(&client, &request, std::path::Path::new("data/s2_truecolor"))?;
//!     println!("{:?} -> {}", image.dim(), paths.tif.display());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod display;
mod error;
mod evalscript;
mod geometry;
mod output;
mod process;
mod raster;
mod util;

use anyhow::Result;
use std::path::Path;

pub use client::{Client, ImageRequest};
pub use config::{
    CDSE_AUTH_BASE_URL, CDSE_BASE_URL, CDSE_TOKEN_URL, CLIENT_ID_ENV, CLIENT_SECRET_ENV,
    CONFIG_PATH_ENV, CredentialOverrides, DEFAULT_PROFILE, ProfileStore, SentinelHubConfig,
    load_config, provision,
};
pub use display::{display_rgb, show_image};
pub use evalscript::{Band, Evalscript, EvalscriptBuilder, SampleType};
pub use geometry::{BBox, MAX_DIMENSION, TimeInterval, bbox_to_dimensions, to_utm, utm_zone};
pub use output::{SavedPaths, read_npy, save_all, write_jpeg, write_npy, write_tiff16};
pub use process::{DATA_COLLECTION, MOSAICKING_ORDER, ProcessRequest};
pub use raster::{PixelArray, decode_tiff, normalization_divisor, normalize, to_display_u8};

/// Fetches one image and writes `<output_base>.npy`, `.jpg` and `.tif`.
pub fn download_image(
    client: &Client,
    request: &ImageRequest,
    output_base: &Path,
) -> Result<(PixelArray, SavedPaths)> {
    let image = client.fetch_image(request)?;
    let paths = save_all(&image, output_base)?;
    Ok((image, paths))
}
