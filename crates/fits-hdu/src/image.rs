//! Image data units: decoding from and encoding to big-endian data blocks.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use rayon::prelude::*;
use tracing::debug;

use crate::block::pad_data_unit;
use crate::config::CodecOptions;
use crate::endian::{decode_slice, encode_be, BeWord};
use crate::error::{FitsError, Result};
use crate::header::Header;
use crate::precision::{apply_precision, DiskPrecision};

/// A zero-based, inclusive window of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRange {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
}

impl PixelRange {
    pub fn new(xmin: usize, xmax: usize, ymin: usize, ymax: usize) -> Self {
        PixelRange {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    fn full(width: usize, height: usize) -> Self {
        PixelRange::new(0, width.saturating_sub(1), 0, height.saturating_sub(1))
    }

    pub fn width(&self) -> usize {
        self.xmax - self.xmin + 1
    }

    pub fn height(&self) -> usize {
        self.ymax - self.ymin + 1
    }

    fn check(&self, width: usize, height: usize) -> Result<()> {
        if self.xmin > self.xmax || self.ymin > self.ymax || self.xmax >= width || self.ymax >= height
        {
            return Err(FitsError::InvalidRange(format!(
                "{self:?} does not fit a {width}x{height} image"
            )));
        }
        Ok(())
    }
}

/// An image held as physical `f64` values, row-major with `NAXIS1` fastest.
///
/// Images have rank 0 (no data), 1 or 2. The header travels with the data
/// and has its structural keywords rewritten whenever the image is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDataUnit {
    header: Header,
    precision: DiskPrecision,
    axes: Vec<usize>,
    data: Vec<f64>,
}

fn check_rank(axes: &[usize]) -> Result<()> {
    if axes.len() > 2 {
        return Err(FitsError::Precision(format!(
            "rank {} images are not supported",
            axes.len()
        )));
    }
    Ok(())
}

/// `(width, height)` of an image of rank 0, 1 or 2.
fn plane(axes: &[usize]) -> (usize, usize) {
    match axes {
        [] => (0, 0),
        [w] => (*w, 1),
        [w, h, ..] => (*w, *h),
    }
}

impl ImageDataUnit {
    /// A `width` x `height` image of zeros.
    pub fn new(width: usize, height: usize, precision: DiskPrecision) -> Self {
        let axes = vec![width, height];
        ImageDataUnit {
            header: Header::make_default(false, Some((precision, axes.as_slice()))),
            precision,
            data: vec![0.0; width * height],
            axes,
        }
    }

    /// An image without a data unit.
    pub fn empty(precision: DiskPrecision) -> Self {
        ImageDataUnit {
            header: Header::make_default(false, None),
            precision,
            axes: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Wrap row-major `data` of the given axes.
    pub fn from_vec(axes: Vec<usize>, data: Vec<f64>, precision: DiskPrecision) -> Result<Self> {
        check_rank(&axes)?;
        let expected = if axes.is_empty() {
            0
        } else {
            axes.iter().product()
        };
        if data.len() != expected {
            return Err(FitsError::ShapeMismatch {
                left: axes,
                right: vec![data.len()],
            });
        }
        Ok(ImageDataUnit {
            header: Header::make_default(false, Some((precision, axes.as_slice()))),
            precision,
            axes,
            data,
        })
    }

    /// Replace the header. Its structural keywords are rewritten to match
    /// this image.
    pub fn with_header(mut self, mut header: Header) -> Self {
        apply_precision(&mut header, self.precision, Some(self.axes.as_slice()));
        self.header = header;
        self
    }

    /// Decode the data unit at the current stream position.
    ///
    /// `header` describes the unit; with `range` only that window is read and
    /// the rows and columns outside it are seeked over. The returned image's
    /// header is updated to the window's shape.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        mut header: Header,
        range: Option<PixelRange>,
        options: &CodecOptions,
    ) -> Result<Self> {
        let bitpix = header
            .bitpix()
            .ok_or_else(|| FitsError::Precision("header has no BITPIX".into()))?;
        let axes = header.axes();
        check_rank(&axes)?;
        let precision = DiskPrecision::from_bitpix_bzero(bitpix, header.bzero())?;
        let bzero = if precision.is_float() {
            header.bzero()
        } else {
            precision.bzero()
        };
        let bscale = header.bscale();

        let (width, height) = plane(&axes);
        if axes.is_empty() || width == 0 || height == 0 {
            if range.is_some() {
                return Err(FitsError::InvalidRange("image has no pixels".into()));
            }
            return Ok(ImageDataUnit {
                header,
                precision,
                axes,
                data: Vec::new(),
            });
        }
        let window = range.unwrap_or_else(|| PixelRange::full(width, height));
        window.check(width, height)?;

        let bpp = precision.bytes_per_pixel();
        ensure_available(reader, window.ymax, width, window.xmax + 1, bpp)?;
        let row_bytes = window.width() * bpp;
        let mut raw = vec![0u8; row_bytes * window.height()];
        let skip_rows = (window.ymin * width * bpp) as i64;
        if window.width() == width {
            reader.seek(SeekFrom::Current(skip_rows))?;
            fill(reader, &mut raw)?;
        } else {
            let lead = (window.xmin * bpp) as i64;
            let trail = ((width - window.xmax - 1) * bpp) as i64;
            reader.seek(SeekFrom::Current(skip_rows))?;
            for row in raw.chunks_exact_mut(row_bytes) {
                reader.seek(SeekFrom::Current(lead))?;
                fill(reader, row)?;
                reader.seek(SeekFrom::Current(trail))?;
            }
        }
        debug!(bitpix, ?window, bytes = raw.len(), "read data unit");

        let data = decode(precision, &raw, window.width(), bscale, bzero, options);
        let out_axes = if axes.len() == 1 {
            vec![window.width()]
        } else {
            vec![window.width(), window.height()]
        };
        apply_precision(&mut header, precision, Some(out_axes.as_slice()));
        Ok(ImageDataUnit {
            header,
            precision,
            axes: out_axes,
            data,
        })
    }

    /// Serialise the pixels big-endian for `precision`, padded with zeros to
    /// a whole number of blocks. Integer kinds round to nearest and clamp.
    pub fn encode_data(&self, precision: DiskPrecision, options: &CodecOptions) -> Vec<u8> {
        let bias = precision.bzero();
        let row = self.width().max(1);
        let data = &self.data;
        let mut bytes = match precision {
            DiskPrecision::Boolean => {
                encode_rows(data, row, options, |v| u8::from(v != 0.0 && !v.is_nan()))
            }
            DiskPrecision::Byte | DiskPrecision::SByte => {
                encode_rows(data, row, options, |v| quantize(v - bias, 0.0, 255.0) as u8)
            }
            DiskPrecision::Int16 | DiskPrecision::UInt16 => encode_rows(data, row, options, |v| {
                quantize(v - bias, i16::MIN as f64, i16::MAX as f64) as i16
            }),
            DiskPrecision::Int32 | DiskPrecision::UInt32 => encode_rows(data, row, options, |v| {
                quantize(v - bias, i32::MIN as f64, i32::MAX as f64) as i32
            }),
            DiskPrecision::Int64 => encode_rows(data, row, options, |v| {
                quantize(v, i64::MIN as f64, i64::MAX as f64) as i64
            }),
            DiskPrecision::UInt64 => encode_rows(data, row, options, |v| {
                ((quantize(v, 0.0, u64::MAX as f64) as u64) ^ SIGN_BIT) as i64
            }),
            DiskPrecision::Single => encode_rows(data, row, options, |v| v as f32),
            DiskPrecision::Double => encode_rows(data, row, options, |v| v),
        };
        pad_data_unit(&mut bytes);
        bytes
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn precision(&self) -> DiskPrecision {
        self.precision
    }

    /// Change the precision the image will be written at.
    pub fn set_precision(&mut self, precision: DiskPrecision) {
        self.precision = precision;
        apply_precision(&mut self.header, precision, Some(self.axes.as_slice()));
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn width(&self) -> usize {
        plane(&self.axes).0
    }

    pub fn height(&self) -> usize {
        plane(&self.axes).1
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, x: usize, y: usize) -> Option<usize> {
        let (w, h) = plane(&self.axes);
        (x < w && y < h).then_some(y * w + x)
    }

    /// The pixel at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        self.offset(x, y).map(|i| self.data[i])
    }

    pub fn set(&mut self, x: usize, y: usize, value: f64) -> Result<()> {
        let i = self.offset(x, y).ok_or_else(|| {
            FitsError::InvalidRange(format!("pixel ({x}, {y}) is outside the image"))
        })?;
        self.data[i] = value;
        Ok(())
    }

    fn zip_with(&self, other: &ImageDataUnit, op: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.axes != other.axes {
            return Err(FitsError::ShapeMismatch {
                left: self.axes.clone(),
                right: other.axes.clone(),
            });
        }
        Ok(ImageDataUnit {
            header: self.header.clone(),
            precision: self.precision,
            axes: self.axes.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| op(a, b))
                .collect(),
        })
    }

    pub fn try_add(&self, other: &ImageDataUnit) -> Result<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn try_subtract(&self, other: &ImageDataUnit) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn try_multiply(&self, other: &ImageDataUnit) -> Result<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn try_divide(&self, other: &ImageDataUnit) -> Result<Self> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Apply `op` to every pixel in place.
    pub fn map_in_place(&mut self, op: impl Fn(f64) -> f64) {
        self.data.iter_mut().for_each(|v| *v = op(*v));
    }

    pub fn add_scalar(&mut self, s: f64) {
        self.map_in_place(|v| v + s);
    }

    pub fn subtract_scalar(&mut self, s: f64) {
        self.map_in_place(|v| v - s);
    }

    pub fn multiply_scalar(&mut self, s: f64) {
        self.map_in_place(|v| v * s);
    }

    pub fn divide_scalar(&mut self, s: f64) {
        self.map_in_place(|v| v / s);
    }
}

#[cfg(feature = "array")]
impl ImageDataUnit {
    /// The pixels as a `(rows, columns)` array.
    pub fn to_array2(&self) -> Result<ndarray::Array2<f64>> {
        let (w, h) = plane(&self.axes);
        ndarray::Array2::from_shape_vec((h, w), self.data.clone()).map_err(|_| {
            FitsError::ShapeMismatch {
                left: self.axes.clone(),
                right: vec![self.data.len()],
            }
        })
    }

    /// Build an image from a `(rows, columns)` array.
    pub fn from_array2(array: ndarray::ArrayView2<'_, f64>, precision: DiskPrecision) -> Self {
        let (rows, cols) = array.dim();
        let axes = vec![cols, rows];
        ImageDataUnit {
            header: Header::make_default(false, Some((precision, axes.as_slice()))),
            precision,
            axes,
            data: array.iter().copied().collect(),
        }
    }
}

/// Fail before allocating when the stream cannot hold `rows` full rows of
/// `width` pixels followed by `tail` more.
fn ensure_available<R: Seek>(
    reader: &mut R,
    rows: usize,
    width: usize,
    tail: usize,
    bpp: usize,
) -> Result<()> {
    let needed = rows
        .checked_mul(width)
        .and_then(|n| n.checked_add(tail))
        .and_then(|n| n.checked_mul(bpp))
        .ok_or(FitsError::UnexpectedEof)? as u64;
    let pos = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(pos))?;
    if end.saturating_sub(pos) < needed {
        return Err(FitsError::UnexpectedEof);
    }
    Ok(())
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => FitsError::UnexpectedEof,
        _ => FitsError::Io(e),
    })
}

fn quantize(v: f64, lo: f64, hi: f64) -> f64 {
    libm::round(v).clamp(lo, hi)
}

/// Sign bit of a 64-bit word; flipping it maps `i64` storage onto `u64`.
const SIGN_BIT: u64 = 1 << 63;

fn decode(
    precision: DiskPrecision,
    raw: &[u8],
    row_len: usize,
    bscale: f64,
    bzero: f64,
    options: &CodecOptions,
) -> Vec<f64> {
    let scaled = move |v: f64| v * bscale + bzero;
    match precision.bitpix() {
        8 => decode_rows(raw, row_len, options, move |s: u8| scaled(s.to_f64())),
        16 => decode_rows(raw, row_len, options, move |s: i16| scaled(s.to_f64())),
        32 => decode_rows(raw, row_len, options, move |s: i32| scaled(s.to_f64())),
        64 if precision == DiskPrecision::UInt64 && bscale == 1.0 => {
            decode_rows(raw, row_len, options, |s: u64| (s ^ SIGN_BIT) as f64)
        }
        64 => decode_rows(raw, row_len, options, move |s: i64| scaled(s.to_f64())),
        -32 => decode_rows(raw, row_len, options, move |s: f32| scaled(s.to_f64())),
        _ => decode_rows(raw, row_len, options, move |s: f64| scaled(s)),
    }
}

fn decode_rows<T, F>(raw: &[u8], row_len: usize, options: &CodecOptions, convert: F) -> Vec<f64>
where
    T: BeWord,
    F: Fn(T) -> f64 + Sync + Send,
{
    let mut out = vec![0.0; raw.len() / T::WIDTH];
    if options.parallel && row_len > 0 {
        options.install(|| {
            out.par_chunks_mut(row_len)
                .zip(raw.par_chunks(row_len * T::WIDTH))
                .for_each(|(dst, src)| decode_slice(src, dst, &convert));
        });
    } else {
        decode_slice(raw, &mut out, &convert);
    }
    out
}

fn encode_rows<T, F>(data: &[f64], row_len: usize, options: &CodecOptions, convert: F) -> Vec<u8>
where
    T: BeWord,
    F: Fn(f64) -> T + Sync + Send,
{
    let stored: Vec<T> = if options.parallel {
        options.install(|| {
            data.par_chunks(row_len)
                .flat_map_iter(|row| row.iter().map(|&v| convert(v)))
                .collect()
        })
    } else {
        data.iter().map(|&v| convert(v)).collect()
    };
    encode_be(&stored)
}
