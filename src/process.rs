use serde::{Deserialize, Serialize};

use crate::evalscript::Evalscript;
use crate::geometry::{BBox, CRS84_URI, TimeInterval, TimeRange};

/// Collection every request reads from.
pub const DATA_COLLECTION: &str = "sentinel-2-l2a";
/// Scenes covering the same pixel are ordered by cloud cover, least first.
pub const MOSAICKING_ORDER: &str = "leastCC";
pub const TIFF_MIME: &str = "image/tiff";

/// Body of a Process API call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRequest {
    input: ProcessInput,
    output: ProcessOutput,
    evalscript: String,
}

impl ProcessRequest {
    pub fn new(
        bbox: &BBox,
        interval: TimeInterval,
        evalscript: &Evalscript,
        (width, height): (u32, u32),
    ) -> Self {
        Self {
            input: ProcessInput {
                bounds: Bounds {
                    bbox: bbox.to_array(),
                    properties: BoundsProperties {
                        crs: CRS84_URI.to_string(),
                    },
                },
                data: vec![InputData {
                    kind: DATA_COLLECTION.to_string(),
                    data_filter: DataFilter {
                        time_range: interval.to_time_range(),
                        mosaicking_order: MOSAICKING_ORDER.to_string(),
                    },
                }],
            },
            output: ProcessOutput {
                width,
                height,
                responses: vec![OutputResponse {
                    identifier: "default".to_string(),
                    format: OutputFormat {
                        kind: TIFF_MIME.to_string(),
                    },
                }],
            },
            evalscript: evalscript.render(),
        }
    }

    pub fn width(&self) -> u32 {
        self.output.width
    }

    pub fn height(&self) -> u32 {
        self.output.height
    }

    pub fn evalscript(&self) -> &str {
        &self.evalscript
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProcessInput {
    bounds: Bounds,
    data: Vec<InputData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Bounds {
    bbox: [f64; 4],
    properties: BoundsProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct BoundsProperties {
    crs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct InputData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "dataFilter")]
    data_filter: DataFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataFilter {
    time_range: TimeRange,
    mosaicking_order: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProcessOutput {
    width: u32,
    height: u32,
    responses: Vec<OutputResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct OutputResponse {
    identifier: String,
    format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct OutputFormat {
    #[serde(rename = "type")]
    kind: String,
}

/// OAuth2 client-credentials token reply.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}
