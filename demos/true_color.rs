use anyhow::Result;
use s2fetch::{BBox, Client, DEFAULT_PROFILE, Evalscript, ImageRequest, TimeInterval};
use std::path::Path;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Run `s2fetch configure` once, or export SH_CLIENT_ID / SH_CLIENT_SECRET.
    let client = Client::from_profile(DEFAULT_PROFILE)?;

    let request = ImageRequest::new(
        BBox::new([15.461282, 46.757161, 15.574922, 46.851514])?,
        TimeInterval::parse("2022-07-01", "2022-07-20")?,
        Evalscript::for_bands(["B02", "B03", "B04"])?,
        10.0,
    );

    let (image, _paths) = s2fetch::download_image(&client, &request, Path::new("data/s2_truecolor"))?;

    if cfg!(feature = "viewer") {
        s2fetch::show_image(&image, "True Color Sentinel-2 Image")?;
    }
    Ok(())
}
