use anyhow::{Result, bail};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A spectral channel identifier such as `B02`, `B8A` or `SCL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Band(String);

impl Band {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name: String = name.into();
        let name = name.trim();
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            bail!(
                "invalid band name `{}` (expected letters, digits or `_`, starting with a letter)",
                name
            );
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Band {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Band::new(s)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample type of the raster the provider renders.
///
/// `Auto` maps reflectance in `[0, 1]` to 8-bit values on the provider side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleType {
    #[default]
    Auto,
    Uint8,
    Uint16,
    Float32,
}

impl SampleType {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleType::Auto => "AUTO",
            SampleType::Uint8 => "UINT8",
            SampleType::Uint16 => "UINT16",
            SampleType::Float32 => "FLOAT32",
        }
    }
}

impl FromStr for SampleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(SampleType::Auto),
            "UINT8" => Ok(SampleType::Uint8),
            "UINT16" => Ok(SampleType::Uint16),
            "FLOAT32" => Ok(SampleType::Float32),
            other => bail!(
                "unknown sample type `{}` (expected AUTO, UINT8, UINT16 or FLOAT32)",
                other
            ),
        }
    }
}

/// A validated per-pixel evaluation script.
///
/// The input declaration and the output tuple are both rendered from the
/// same ordered band list, so output channel `i` is always band `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evalscript {
    bands: Vec<Band>,
    sample_type: SampleType,
}

impl Evalscript {
    pub fn builder() -> EvalscriptBuilder {
        EvalscriptBuilder::default()
    }

    /// Shortcut for a script that returns `bands` as-is with the default sample type.
    pub fn for_bands<I, S>(bands: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::builder().bands(bands).build()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn render(&self) -> String {
        let names = self
            .bands
            .iter()
            .map(|b| format!("\"{}\"", b))
            .collect::<Vec<_>>()
            .join(", ");
        let samples = self
            .bands
            .iter()
            .map(|b| format!("sample.{}", b))
            .collect::<Vec<_>>()
            .join(", ");
        let sample_type = match self.sample_type {
            SampleType::Auto => String::new(),
            other => format!(",\n            sampleType: \"{}\"", other.as_str()),
        };

        format!(
            "//VERSION=3\n\
             function setup() {{\n\
             \x20   return {{\n\
             \x20       input: [{{\n\
             \x20           bands: [{names}]\n\
             \x20       }}],\n\
             \x20       output: {{\n\
             \x20           bands: {count}{sample_type}\n\
             \x20       }}\n\
             \x20   }};\n\
             }}\n\
             \n\
             function evaluatePixel(sample) {{\n\
             \x20   return [{samples}];\n\
             }}\n",
            count = self.bands.len(),
        )
    }
}

impl fmt::Display for Evalscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvalscriptBuilder {
    bands: Vec<String>,
    sample_type: SampleType,
}

impl EvalscriptBuilder {
    pub fn band(mut self, band: impl AsRef<str>) -> Self {
        self.bands.push(band.as_ref().to_string());
        self
    }

    pub fn bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.bands
            .extend(bands.into_iter().map(|b| b.as_ref().to_string()));
        self
    }

    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn build(self) -> Result<Evalscript> {
        if self.bands.is_empty() {
            bail!("an evaluation script needs at least one band");
        }

        let mut seen = HashSet::new();
        let mut bands = Vec::with_capacity(self.bands.len());
        for name in self.bands {
            let band = Band::new(name)?;
            if !seen.insert(band.clone()) {
                bail!("band `{}` is listed more than once", band);
            }
            bands.push(band);
        }

        Ok(Evalscript {
            bands,
            sample_type: self.sample_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_true_color_script() {
        let script = Evalscript::for_bands(["B02", "B03", "B04"]).unwrap();
        let expected = "//VERSION=3
function setup() {
    return {
        input: [{
            bands: [\"B02\", \"B03\", \"B04\"]
        }],
        output: {
            bands: 3
        }
    };
}

function evaluatePixel(sample) {
    return [sample.B02, sample.B03, sample.B04];
}
";
        assert_eq!(script.render(), expected);
    }

    #[test]
    fn output_tuple_follows_input_order() {
        let script = Evalscript::for_bands(["B04", "B03", "B02"]).unwrap();
        let text = script.render();
        assert!(text.contains("bands: [\"B04\", \"B03\", \"B02\"]"));
        assert!(text.contains("return [sample.B04, sample.B03, sample.B02];"));
        let names: Vec<_> = script.bands().iter().map(Band::as_str).collect();
        assert_eq!(names, ["B04", "B03", "B02"]);
    }

    #[test]
    fn explicit_sample_type_is_declared() {
        let script = Evalscript::builder()
            .band("B08")
            .sample_type(SampleType::Uint16)
            .build()
            .unwrap();
        assert!(script.render().contains("bands: 1,\n            sampleType: \"UINT16\""));
    }

    #[test]
    fn rejects_empty_duplicate_and_malformed_bands() {
        assert!(Evalscript::builder().build().is_err());
        assert!(Evalscript::for_bands(["B02", "B02"]).is_err());
        assert!(Evalscript::for_bands(["B02", "sample.B03"]).is_err());
        assert!(Evalscript::for_bands(["2B"]).is_err());
        assert!(Evalscript::for_bands(["B8A", "SCL", "dataMask"]).is_ok());
    }

    #[test]
    fn sample_type_parsing() {
        assert_eq!("uint16".parse::<SampleType>().unwrap(), SampleType::Uint16);
        assert_eq!("AUTO".parse::<SampleType>().unwrap(), SampleType::Auto);
        assert!("int64".parse::<SampleType>().is_err());
    }
}
