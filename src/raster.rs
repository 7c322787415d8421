use anyhow::{Context, Result, anyhow, bail};
use ndarray::Array3;
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult, Limits};

/// Pixel grid of shape `(height, width, channels)` in the sample type the provider returned.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    U8(Array3<u8>),
    U16(Array3<u16>),
    F32(Array3<f32>),
}

impl PixelArray {
    pub fn height(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn channels(&self) -> usize {
        self.dim().2
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            PixelArray::U8(a) => a.dim(),
            PixelArray::U16(a) => a.dim(),
            PixelArray::F32(a) => a.dim(),
        }
    }

    /// Name of the element type, NumPy style.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            PixelArray::U8(_) => "uint8",
            PixelArray::U16(_) => "uint16",
            PixelArray::F32(_) => "float32",
        }
    }

    /// Largest sample value, ignoring NaN. Empty arrays report 0.
    pub fn max_value(&self) -> f64 {
        match self {
            PixelArray::U8(a) => a.iter().copied().max().unwrap_or(0) as f64,
            PixelArray::U16(a) => a.iter().copied().max().unwrap_or(0) as f64,
            PixelArray::F32(a) => a
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(0.0f32, f32::max) as f64,
        }
    }

    pub fn to_f32(&self) -> Array3<f32> {
        match self {
            PixelArray::U8(a) => a.mapv(|v| v as f32),
            PixelArray::U16(a) => a.mapv(|v| v as f32),
            PixelArray::F32(a) => a.clone(),
        }
    }

    /// Values cast to `u16` the way a numeric cast does: floats truncate and saturate.
    pub fn to_u16(&self) -> Array3<u16> {
        match self {
            PixelArray::U8(a) => a.mapv(u16::from),
            PixelArray::U16(a) => a.clone(),
            PixelArray::F32(a) => a.mapv(|v| v as u16),
        }
    }
}

/// Divisor used to bring an array with maximum `max` into `[0, 1]`.
///
/// Returns `None` when there is nothing positive to scale by.
pub fn normalization_divisor(max: f64) -> Option<f64> {
    if !max.is_finite() || max <= 0.0 {
        None
    } else if max <= 255.0 {
        Some(255.0)
    } else if max <= 4096.0 {
        Some(4096.0)
    } else {
        Some(max)
    }
}

/// Maps the array into `[0, 1]` for display and 8-bit encoding.
///
/// The divisor is chosen from the array maximum: 255 for 8-bit data, 4096
/// for 12-bit sensor data, otherwise the maximum itself. An array without
/// positive values normalizes to zeros; NaN samples become zero.
pub fn normalize(image: &PixelArray) -> Array3<f32> {
    let values = image.to_f32();
    match normalization_divisor(image.max_value()) {
        Some(divisor) => values.mapv(|v| {
            if v.is_nan() {
                0.0
            } else {
                (v as f64 / divisor) as f32
            }
        }),
        None => values.mapv(|_| 0.0),
    }
}

/// Normalized image scaled to `[0, 255]` and truncated to bytes.
pub fn to_display_u8(image: &PixelArray) -> Array3<u8> {
    normalize(image).mapv(|v| (v * 255.0) as u8)
}

/// Decodes the first image of a TIFF payload into a pixel array.
///
/// Channel count is derived from the sample count, so single-band and
/// multi-band rasters both come back as `(height, width, channels)`.
pub fn decode_tiff(bytes: &[u8]) -> Result<PixelArray> {
    let mut decoder = Decoder::new(Cursor::new(bytes))
        .context("response is not a readable TIFF")?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions().context("failed to read TIFF dimensions")?;
    let (width, height) = (width as usize, height as usize);
    let pixels = width * height;
    if pixels == 0 {
        bail!("TIFF has no pixels ({}x{})", width, height);
    }

    let data = decoder.read_image().context("failed to decode TIFF image data")?;
    let len = decoding_len(&data);
    if len % pixels != 0 {
        bail!(
            "TIFF sample count {} is not a multiple of {}x{} pixels",
            len,
            width,
            height
        );
    }
    let shape = (height, width, len / pixels);

    let array = match data {
        DecodingResult::U8(v) => PixelArray::U8(Array3::from_shape_vec(shape, v)?),
        DecodingResult::U16(v) => PixelArray::U16(Array3::from_shape_vec(shape, v)?),
        DecodingResult::F32(v) => PixelArray::F32(Array3::from_shape_vec(shape, v)?),
        DecodingResult::F64(v) => PixelArray::F32(Array3::from_shape_vec(
            shape,
            v.into_iter().map(|x| x as f32).collect(),
        )?),
        DecodingResult::I16(v) => PixelArray::F32(Array3::from_shape_vec(
            shape,
            v.into_iter().map(|x| x as f32).collect(),
        )?),
        DecodingResult::U32(v) => PixelArray::F32(Array3::from_shape_vec(
            shape,
            v.into_iter().map(|x| x as f32).collect(),
        )?),
        other => return Err(anyhow!("unsupported TIFF sample format: {:?}", kind(&other))),
    };

    Ok(array)
}

fn decoding_len(data: &DecodingResult) -> usize {
    match data {
        DecodingResult::U8(v) => v.len(),
        DecodingResult::U16(v) => v.len(),
        DecodingResult::U32(v) => v.len(),
        DecodingResult::U64(v) => v.len(),
        DecodingResult::F32(v) => v.len(),
        DecodingResult::F64(v) => v.len(),
        DecodingResult::I8(v) => v.len(),
        DecodingResult::I16(v) => v.len(),
        DecodingResult::I32(v) => v.len(),
        DecodingResult::I64(v) => v.len(),
    }
}

fn kind(data: &DecodingResult) -> &'static str {
    match data {
        DecodingResult::U8(_) => "u8",
        DecodingResult::U16(_) => "u16",
        DecodingResult::U32(_) => "u32",
        DecodingResult::U64(_) => "u64",
        DecodingResult::F32(_) => "f32",
        DecodingResult::F64(_) => "f64",
        DecodingResult::I8(_) => "i8",
        DecodingResult::I16(_) => "i16",
        DecodingResult::I32(_) => "i32",
        DecodingResult::I64(_) => "i64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tiff::encoder::{TiffEncoder, colortype};

    fn u16_array(values: &[u16]) -> PixelArray {
        PixelArray::U16(Array3::from_shape_vec((1, values.len(), 1), values.to_vec()).unwrap())
    }

    #[test]
    fn eight_bit_range_divides_by_255() {
        let img = u16_array(&[0, 51, 255]);
        let n = normalize(&img);
        assert_relative_eq!(n[[0, 1, 0]], 0.2);
        assert_relative_eq!(n[[0, 2, 0]], 1.0);
    }

    #[test]
    fn twelve_bit_range_divides_by_4096() {
        let img = u16_array(&[256, 1024, 4096]);
        let n = normalize(&img);
        assert_relative_eq!(n[[0, 0, 0]], 256.0 / 4096.0);
        assert_relative_eq!(n[[0, 1, 0]], 0.25);
        assert_relative_eq!(n[[0, 2, 0]], 1.0);
    }

    #[test]
    fn wide_range_divides_by_max() {
        let img = u16_array(&[5000, 10000, 20000]);
        let n = normalize(&img);
        assert_eq!(n.iter().copied().fold(0.0f32, f32::max), 1.0);
        assert_relative_eq!(n[[0, 1, 0]], 0.5);
    }

    #[test]
    fn all_zero_normalizes_to_zero_without_nan() {
        let img = PixelArray::F32(Array3::zeros((4, 4, 3)));
        let n = normalize(&img);
        assert!(n.iter().all(|v| *v == 0.0));
        assert_eq!(normalization_divisor(0.0), None);
    }

    #[test]
    fn nan_samples_are_ignored() {
        let img = PixelArray::F32(
            Array3::from_shape_vec((1, 3, 1), vec![f32::NAN, 0.5, 1.0]).unwrap(),
        );
        assert_eq!(img.max_value(), 1.0);
        let n = normalize(&img);
        assert_eq!(n[[0, 0, 0]], 0.0);
        assert_relative_eq!(n[[0, 2, 0]], 1.0 / 255.0);
    }

    #[test]
    fn normalization_leaves_source_untouched() {
        let img = u16_array(&[100, 4000]);
        let before = img.clone();
        let _ = normalize(&img);
        assert_eq!(img, before);
    }

    #[test]
    fn display_bytes_scale_to_full_range() {
        let img = PixelArray::U8(Array3::from_shape_vec((1, 2, 1), vec![0, 255]).unwrap());
        let bytes = to_display_u8(&img);
        assert_eq!(bytes.as_slice().unwrap(), &[0, 255]);
    }

    #[test]
    fn decodes_rgb_tiff_into_channels() {
        // 2x1 RGB image: first pixel (1,2,3), second (4,5,6)
        let mut buf = Cursor::new(Vec::new());
        TiffEncoder::new(&mut buf)
            .unwrap()
            .write_image::<colortype::RGB8>(2, 1, &[1, 2, 3, 4, 5, 6])
            .unwrap();

        let img = decode_tiff(buf.get_ref()).unwrap();
        assert_eq!(img.dim(), (1, 2, 3));
        match img {
            PixelArray::U8(a) => {
                assert_eq!(a[[0, 0, 2]], 3);
                assert_eq!(a[[0, 1, 0]], 4);
            }
            other => panic!("expected u8 raster, got {}", other.dtype_name()),
        }
    }

    #[test]
    fn decodes_float_tiff() {
        let mut buf = Cursor::new(Vec::new());
        TiffEncoder::new(&mut buf)
            .unwrap()
            .write_image::<colortype::Gray32Float>(2, 2, &[0.1, 0.2, 0.3, 0.4])
            .unwrap();
        let img = decode_tiff(buf.get_ref()).unwrap();
        assert_eq!(img.dim(), (2, 2, 1));
        assert_eq!(img.dtype_name(), "float32");
    }

    #[test]
    fn garbage_is_not_a_tiff() {
        assert!(decode_tiff(b"{\"error\":\"nope\"}").is_err());
    }
}
