use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::Serialize;

/// Largest raster side (in pixels) the Process API accepts in a single request.
pub const MAX_DIMENSION: u32 = 2500;

const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// CRS identifier the Process API expects for lon/lat bounds.
pub(crate) const CRS84_URI: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";

/// Geographic rectangle in WGS84 degrees, lon/lat axis order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// Builds a box from `[min_lon, min_lat, max_lon, max_lat]`.
    pub fn new(coords: [f64; 4]) -> Result<Self> {
        let [min_lon, min_lat, max_lon, max_lat] = coords;
        if coords.iter().any(|c| !c.is_finite()) {
            bail!("bounding box contains a non-finite coordinate: {:?}", coords);
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            bail!(
                "invalid bounding box {:?}: expected min < max on both axes",
                coords
            );
        }
        if !(-180.0..=180.0).contains(&min_lon)
            || !(-180.0..=180.0).contains(&max_lon)
            || !(-90.0..=90.0).contains(&min_lat)
            || !(-90.0..=90.0).contains(&max_lat)
        {
            bail!("bounding box {:?} is outside WGS84 bounds", coords);
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// Inclusive range of calendar days used to filter candidate scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeInterval {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("invalid time interval: {} is after {}", start, end);
        }
        Ok(Self { start, end })
    }

    /// Parses two `YYYY-MM-DD` dates.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// RFC 3339 bounds covering the whole of both days.
    pub(crate) fn to_time_range(self) -> TimeRange {
        TimeRange {
            from: format!("{}T00:00:00Z", self.start.format("%Y-%m-%d")),
            to: format!("{}T23:59:59Z", self.end.format("%Y-%m-%d")),
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date `{}` (expected YYYY-MM-DD)", s))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct TimeRange {
    pub(crate) from: String,
    pub(crate) to: String,
}

/// UTM zone number and hemisphere (`true` for south) containing a point.
pub fn utm_zone(lon: f64, lat: f64) -> (u8, bool) {
    let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
    (zone, lat < 0.0)
}

/// Projects a lon/lat point into the given UTM zone, returning easting/northing in meters.
pub fn to_utm(lon: f64, lat: f64, zone: u8, south: bool) -> Result<(f64, f64)> {
    let source = Proj::from_proj_string(WGS84_PROJ)
        .map_err(|e| anyhow!("invalid WGS84 projection: {e:?}"))?;
    let target_str = format!(
        "+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs",
        zone,
        if south { " +south" } else { "" }
    );
    let target = Proj::from_proj_string(&target_str)
        .map_err(|e| anyhow!("invalid UTM projection `{}`: {e:?}", target_str))?;

    // proj4rs works in radians for geographic coordinates
    let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
    transform(&source, &target, &mut point)
        .map_err(|e| anyhow!("projection of ({lon}, {lat}) to UTM zone {zone} failed: {e:?}"))?;
    Ok((point.0, point.1))
}

/// Output raster size `(width, height)` for a box sampled at `resolution` meters.
///
/// Both corners are projected into the UTM zone of the box centre and the
/// metric extent is divided by the resolution, rounding to the nearest pixel.
pub fn bbox_to_dimensions(bbox: &BBox, resolution: f64) -> Result<(u32, u32)> {
    if !resolution.is_finite() || resolution <= 0.0 {
        bail!("resolution must be a positive number of meters, got {}", resolution);
    }

    let (lon, lat) = bbox.center();
    let (zone, south) = utm_zone(lon, lat);
    let (east1, north1) = to_utm(bbox.min_lon, bbox.min_lat, zone, south)?;
    let (east2, north2) = to_utm(bbox.max_lon, bbox.max_lat, zone, south)?;

    let width = ((east2 - east1).abs() / resolution).round();
    let height = ((north2 - north1).abs() / resolution).round();

    if width < 1.0 || height < 1.0 {
        bail!(
            "bounding box is smaller than one pixel at {} m resolution ({}x{})",
            resolution,
            width,
            height
        );
    }
    if width > MAX_DIMENSION as f64 || height > MAX_DIMENSION as f64 {
        bail!(
            "requested raster {}x{} exceeds the {} px limit per side; use a coarser resolution or a smaller box",
            width,
            height,
            MAX_DIMENSION
        );
    }

    Ok((width as u32, height as u32))
}
