use anyhow::{Context, Result, anyhow, bail};
use image::{ExtendedColorType, ImageFormat};
use ndarray::{Array3, Axis};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::encoder::{TiffEncoder, colortype};
use tracing::info;

use crate::raster::{PixelArray, to_display_u8};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Paths of the three artifacts written for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaths {
    pub npy: PathBuf,
    pub jpg: PathBuf,
    pub tif: PathBuf,
}

impl SavedPaths {
    /// `<base>.npy`, `<base>.jpg` and `<base>.tif`.
    pub fn for_base(base: &Path) -> Self {
        Self {
            npy: with_suffix(base, ".npy"),
            jpg: with_suffix(base, ".jpg"),
            tif: with_suffix(base, ".tif"),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(base.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

/// Writes the raw dump, the 8-bit JPEG and the 16-bit TIFF next to `output_base`.
pub fn save_all(image: &PixelArray, output_base: &Path) -> Result<SavedPaths> {
    let paths = SavedPaths::for_base(output_base);
    ensure_parent(&paths.npy)?;

    write_npy(image, &paths.npy)?;
    info!(path = %paths.npy.display(), dtype = image.dtype_name(), "NPY saved");

    write_jpeg(image, &paths.jpg)?;
    info!(path = %paths.jpg.display(), "JPEG saved");

    write_tiff16(image, &paths.tif)?;
    info!(path = %paths.tif.display(), "TIFF saved");

    Ok(paths)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// NPY v1.0 dump of the array at its stored precision, C order.
pub fn write_npy(image: &PixelArray, path: &Path) -> Result<()> {
    let (h, w, c) = image.dim();
    let descr = match image {
        PixelArray::U8(_) => "|u1",
        PixelArray::U16(_) => "<u2",
        PixelArray::F32(_) => "<f4",
    };

    let header_dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({}, {}, {}), }}",
        descr, h, w, c
    );
    // magic (6) + version (2) + length (2) + dict + '\n' is padded to 64 bytes
    let unpadded = NPY_MAGIC.len() + 4 + header_dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    let header = format!("{}{}\n", header_dict, " ".repeat(pad));
    let header_len = u16::try_from(header.len()).context("NPY header too long")?;

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    out.write_all(NPY_MAGIC)?;
    out.write_all(&[1, 0])?;
    out.write_all(&header_len.to_le_bytes())?;
    out.write_all(header.as_bytes())?;

    match image {
        PixelArray::U8(a) => {
            let bytes: Vec<u8> = a.iter().copied().collect();
            out.write_all(&bytes)?;
        }
        PixelArray::U16(a) => {
            for v in a.iter() {
                out.write_all(&v.to_le_bytes())?;
            }
        }
        PixelArray::F32(a) => {
            for v in a.iter() {
                out.write_all(&v.to_le_bytes())?;
            }
        }
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Reads back an array written by [`write_npy`].
pub fn read_npy(path: &Path) -> Result<PixelArray> {
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .read_to_end(&mut bytes)?;

    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        bail!("{} is not an NPY file", path.display());
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        v => bail!("unsupported NPY version {}", v),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| anyhow!("truncated NPY header in {}", path.display()))?;
    let header = std::str::from_utf8(header).context("NPY header is not UTF-8")?;

    if header.contains("'fortran_order': True") {
        bail!("Fortran-ordered NPY arrays are not supported");
    }
    let descr = header_value(header, "descr")
        .and_then(|v| v.split('\'').nth(1))
        .ok_or_else(|| anyhow!("NPY header has no descr: {}", header))?;
    let shape = parse_shape(header)?;
    let data = &bytes[data_start..];

    let n = shape
        .0
        .checked_mul(shape.1)
        .and_then(|v| v.checked_mul(shape.2))
        .ok_or_else(|| anyhow!("NPY shape {:?} overflows", shape))?;
    match descr {
        "|u1" | "u1" => {
            check_len(data, n, 1)?;
            Ok(PixelArray::U8(Array3::from_shape_vec(shape, data[..n].to_vec())?))
        }
        "<u2" => {
            check_len(data, n, 2)?;
            let values = data
                .chunks_exact(2)
                .take(n)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            Ok(PixelArray::U16(Array3::from_shape_vec(shape, values)?))
        }
        "<f4" => {
            check_len(data, n, 4)?;
            let values = data
                .chunks_exact(4)
                .take(n)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Ok(PixelArray::F32(Array3::from_shape_vec(shape, values)?))
        }
        other => bail!("unsupported NPY dtype {}", other),
    }
}

fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{}':", key);
    header.find(&needle).map(|i| header[i + needle.len()..].trim_start())
}

fn parse_shape(header: &str) -> Result<(usize, usize, usize)> {
    let rest = header_value(header, "shape").ok_or_else(|| anyhow!("NPY header has no shape"))?;
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.split(')').next())
        .ok_or_else(|| anyhow!("malformed NPY shape in {}", header))?;
    let dims = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("malformed NPY shape")?;
    match dims.as_slice() {
        [h, w] => Ok((*h, *w, 1)),
        [h, w, c] => Ok((*h, *w, *c)),
        other => bail!("expected a 2D or 3D array, got shape {:?}", other),
    }
}

fn check_len(data: &[u8], n: usize, size: usize) -> Result<()> {
    if data.len() < n * size {
        bail!("NPY payload holds {} bytes, expected {}", data.len(), n * size);
    }
    Ok(())
}

/// 8-bit JPEG of the normalized image.
///
/// One or two bands are written as grayscale from the first band; three or
/// more as RGB from the first three bands.
pub fn write_jpeg(image: &PixelArray, path: &Path) -> Result<()> {
    let (h, w, c) = image.dim();
    let bytes = to_display_u8(image);
    let (buf, color) = if c >= 3 {
        (interleave(&bytes, 3), ExtendedColorType::Rgb8)
    } else {
        (interleave(&bytes, 1), ExtendedColorType::L8)
    };

    image::save_buffer_with_format(path, &buf, w as u32, h as u32, color, ImageFormat::Jpeg)
        .with_context(|| format!("failed to write JPEG {}", path.display()))
}

fn interleave(bytes: &Array3<u8>, channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / bytes.dim().2.max(1) * channels);
    for pixel in bytes.lanes(Axis(2)) {
        out.extend(pixel.iter().take(channels));
    }
    out
}

/// Uncompressed 16-bit TIFF of the original values.
///
/// Gray for one band, RGB for three, RGBA for four; any other band count is
/// written as one grayscale page per band, in band order.
pub fn write_tiff16(image: &PixelArray, path: &Path) -> Result<()> {
    let (h, w, c) = image.dim();
    let (w, h) = (w as u32, h as u32);
    let values = image.to_u16();

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_tiff16_to(&values, c, (w, h), &mut out)?;
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_tiff16_to<W: Write + Seek>(
    values: &Array3<u16>,
    c: usize,
    (w, h): (u32, u32),
    out: &mut W,
) -> Result<()> {
    let mut encoder = TiffEncoder::new(out)?;

    let interleaved = || values.iter().copied().collect::<Vec<u16>>();
    match c {
        1 => encoder.write_image::<colortype::Gray16>(w, h, &interleaved())?,
        3 => encoder.write_image::<colortype::RGB16>(w, h, &interleaved())?,
        4 => encoder.write_image::<colortype::RGBA16>(w, h, &interleaved())?,
        _ => {
            for band in values.axis_iter(Axis(2)) {
                let page: Vec<u16> = band.iter().copied().collect();
                encoder.write_image::<colortype::Gray16>(w, h, &page)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::decode_tiff;
    use tiff::decoder::{Decoder, DecodingResult};

    fn three_band() -> PixelArray {
        // Each channel holds a distinct constant so the mapping is visible after reload.
        let data = (0..4 * 5)
            .flat_map(|_| [100u16, 2000, 4000])
            .collect::<Vec<_>>();
        PixelArray::U16(Array3::from_shape_vec((4, 5, 3), data).unwrap())
    }

    #[test]
    fn paths_append_extensions() {
        let p = SavedPaths::for_base(Path::new("data/s2.v1"));
        assert_eq!(p.npy, PathBuf::from("data/s2.v1.npy"));
        assert_eq!(p.jpg, PathBuf::from("data/s2.v1.jpg"));
        assert_eq!(p.tif, PathBuf::from("data/s2.v1.tif"));
    }

    #[test]
    fn npy_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<f32> = vec![0.0, -1.5, f32::MAX, 1e-30, 0.123_456_79, 42.0];
        let img = PixelArray::F32(Array3::from_shape_vec((1, 2, 3), values).unwrap());
        let path = dir.path().join("a.npy");
        write_npy(&img, &path).unwrap();

        let back = read_npy(&path).unwrap();
        match (&img, &back) {
            (PixelArray::F32(a), PixelArray::F32(b)) => {
                let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
                let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
                assert_eq!(a_bits, b_bits);
                assert_eq!(a.dim(), b.dim());
            }
            _ => panic!("dtype changed on reload"),
        }
    }

    #[test]
    fn npy_header_is_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.npy");
        write_npy(&three_band(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes.len(), 10 + header_len + 4 * 5 * 3 * 2);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
    }

    fn npy_with_header(header: &str, payload: &[u8]) -> Vec<u8> {
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn npy_reads_2d_arrays_as_single_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_d.npy");
        let header = "{'descr': '|u1', 'fortran_order': False, 'shape': (2, 3), }\n";
        std::fs::write(&path, npy_with_header(header, &[1, 2, 3, 4, 5, 6])).unwrap();

        match read_npy(&path).unwrap() {
            PixelArray::U8(a) => {
                assert_eq!(a.dim(), (2, 3, 1));
                assert_eq!(a.as_slice().unwrap(), &[1, 2, 3, 4, 5, 6]);
            }
            other => panic!("expected u8, got {}", other.dtype_name()),
        }
    }

    #[test]
    fn npy_rejects_overflowing_or_truncated_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let huge = dir.path().join("huge.npy");
        let header = format!(
            "{{'descr': '<u2', 'fortran_order': False, 'shape': ({}, {}, 3), }}\n",
            usize::MAX,
            usize::MAX
        );
        std::fs::write(&huge, npy_with_header(&header, &[0; 8])).unwrap();
        let err = read_npy(&huge).unwrap_err().to_string();
        assert!(err.contains("overflows"), "{}", err);

        let short = dir.path().join("short.npy");
        let header = "{'descr': '<u2', 'fortran_order': False, 'shape': (2, 2, 1), }\n";
        std::fs::write(&short, npy_with_header(header, &[0; 6])).unwrap();
        let err = read_npy(&short).unwrap_err().to_string();
        assert!(err.contains("expected 8"), "{}", err);
    }

    #[test]
    fn tiff16_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/dir/x.tif");
        let err = write_tiff16(&three_band(), &path).unwrap_err();
        assert!(format!("{:#}", err).contains("x.tif"), "{:#}", err);
        assert!(!path.exists());
    }

    #[test]
    fn tiff16_encodes_into_any_seekable_writer() {
        let img = three_band();
        let mut buf = std::io::Cursor::new(Vec::new());
        write_tiff16_to(&img.to_u16(), 3, (5, 4), &mut buf).unwrap();
        assert_eq!(decode_tiff(buf.get_ref()).unwrap(), img);
    }

    #[test]
    fn tiff16_keeps_raw_values_and_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.tif");
        let img = three_band();
        write_tiff16(&img, &path).unwrap();

        let back = decode_tiff(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn tiff16_casts_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.tif");
        let img = PixelArray::F32(Array3::from_shape_vec((1, 3, 1), vec![1.9, 70000.0, -3.0]).unwrap());
        write_tiff16(&img, &path).unwrap();
        match decode_tiff(&std::fs::read(&path).unwrap()).unwrap() {
            PixelArray::U16(a) => assert_eq!(a.as_slice().unwrap(), &[1, u16::MAX, 0]),
            other => panic!("expected u16, got {}", other.dtype_name()),
        }
    }

    #[test]
    fn tiff16_writes_one_page_per_band_for_two_bands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.tif");
        let data = vec![1u16, 10, 2, 20];
        let img = PixelArray::U16(Array3::from_shape_vec((1, 2, 2), data).unwrap());
        write_tiff16(&img, &path).unwrap();

        let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
        let mut pages = Vec::new();
        loop {
            match decoder.read_image().unwrap() {
                DecodingResult::U16(v) => pages.push(v),
                _ => panic!("expected 16-bit pages"),
            }
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().unwrap();
        }
        assert_eq!(pages, vec![vec![1, 2], vec![10, 20]]);
    }

    #[test]
    fn save_all_creates_directories_and_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested/out/s2_truecolor");
        let paths = save_all(&three_band(), &base).unwrap();
        for p in [&paths.npy, &paths.jpg, &paths.tif] {
            assert!(p.exists(), "{} missing", p.display());
        }
        let jpeg = image::open(&paths.jpg).unwrap();
        assert_eq!((jpeg.width(), jpeg.height()), (5, 4));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn save_all_logs_each_saved_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("logged");
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();

        let paths =
            tracing::subscriber::with_default(subscriber, || save_all(&three_band(), &base)).unwrap();

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        for (label, path) in [
            ("NPY saved", &paths.npy),
            ("JPEG saved", &paths.jpg),
            ("TIFF saved", &paths.tif),
        ] {
            let line = log
                .lines()
                .find(|l| l.contains(label))
                .unwrap_or_else(|| panic!("no `{}` event in:\n{}", label, log));
            assert!(line.contains(&path.display().to_string()), "{}", line);
        }
    }

    #[test]
    fn single_band_jpeg_is_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.jpg");
        let img = PixelArray::U8(Array3::from_elem((3, 3, 1), 200));
        write_jpeg(&img, &path).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }
}
