//! File-level reading and conserve-on-write updates.
//!
//! Writing one HDU never disturbs the others: every byte range that must
//! survive is read into memory and the new HDU is fully formatted before the
//! destination is truncated, then everything is written in a single pass.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::config::CodecOptions;
use crate::error::{FitsError, Result};
use crate::header::{Header, UnitKind};
use crate::image::{ImageDataUnit, PixelRange};
use crate::precision::{apply_precision, DiskPrecision};
use crate::scan::{self, Expect, ExtensionKind, ExtensionTarget, HeaderUnit};
use crate::value::ValueKind;

/// Where [`write_image`] puts the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Primary,
    /// An image extension identified by `EXTNAME`.
    Extension { name: String, overwrite: bool },
}

/// Which HDU a read addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HduSelector {
    Primary,
    /// An image extension by name or ordinal.
    Extension(ExtensionTarget),
}

impl From<ExtensionTarget> for HduSelector {
    fn from(target: ExtensionTarget) -> Self {
        HduSelector::Extension(target)
    }
}

/// The five situations [`write_image`] distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePlan {
    NewPrimary,
    ReplacePrimary,
    AppendExtension,
    ReplaceExtension,
    NewFileWithExtension,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

fn read_range<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    reader.take(end.saturating_sub(start)).read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_to_end<R: Read + Seek>(reader: &mut R, start: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Format header and data of one HDU.
fn format_hdu(
    image: &ImageDataUnit,
    precision: DiskPrecision,
    unit: UnitKind,
    extname: Option<&str>,
    extend: bool,
    options: &CodecOptions,
) -> Vec<u8> {
    let mut header = image.header().clone();
    let axes = image.axes();
    apply_precision(&mut header, precision, Some(axes));
    if let Some(name) = extname {
        header.set_structural("EXTNAME", name, ValueKind::Text, "extension name");
    }
    if extend {
        header.set_structural("EXTEND", "T", ValueKind::Logical, "extensions may be present");
    }
    let mut bytes = header.to_bytes(unit);
    if !axes.is_empty() {
        bytes.extend(image.encode_data(precision, options));
    }
    bytes
}

fn empty_primary() -> Vec<u8> {
    Header::make_default(true, None).to_bytes(UnitKind::Primary)
}

/// Write `image` to `path` at `precision`, keeping every other HDU intact.
///
/// - A missing file is created, with an empty primary HDU first when the
///   target is an extension.
/// - Replacing the primary keeps every byte after the old primary data unit.
/// - An extension not yet in the file is appended after everything else.
/// - An existing extension is replaced in place when `overwrite` is set and
///   otherwise fails with [`FitsError::Exists`] leaving the file untouched.
pub fn write_image(
    path: impl AsRef<Path>,
    image: &ImageDataUnit,
    target: &WriteTarget,
    precision: DiskPrecision,
    options: &CodecOptions,
) -> Result<()> {
    let path = path.as_ref();
    let exists = path.exists();

    let (plan, prefix, hdu, suffix) = match (exists, target) {
        (false, WriteTarget::Primary) => {
            let hdu = format_hdu(image, precision, UnitKind::Primary, None, false, options);
            (WritePlan::NewPrimary, Vec::new(), hdu, Vec::new())
        }
        (true, WriteTarget::Primary) => {
            let mut reader = open(path)?;
            let primary = scan::scan_header_unit(&mut reader, Expect::Primary)?;
            let suffix = read_to_end(&mut reader, primary.data_end)?;
            let extend = !suffix.is_empty();
            let hdu = format_hdu(image, precision, UnitKind::Primary, None, extend, options);
            (WritePlan::ReplacePrimary, Vec::new(), hdu, suffix)
        }
        (false, WriteTarget::Extension { name, .. }) => {
            let hdu = format_hdu(image, precision, UnitKind::Image, Some(name.as_str()), false, options);
            (WritePlan::NewFileWithExtension, empty_primary(), hdu, Vec::new())
        }
        (true, WriteTarget::Extension { name, overwrite }) => {
            let mut reader = open(path)?;
            let found = scan::seek_extension(
                &mut reader,
                ExtensionKind::Image,
                &ExtensionTarget::Name(name.clone()),
            )?;
            let (plan, prefix, suffix) = match found {
                None => {
                    let end = scan::scan_all(&mut reader)?
                        .last()
                        .map_or(0, |unit| unit.data_end);
                    (WritePlan::AppendExtension, read_range(&mut reader, 0, end)?, Vec::new())
                }
                Some(_) if !overwrite => return Err(FitsError::Exists(name.clone())),
                Some(location) => (
                    WritePlan::ReplaceExtension,
                    read_range(&mut reader, 0, location.header_start())?,
                    read_to_end(&mut reader, location.data_end())?,
                ),
            };
            let hdu = format_hdu(image, precision, UnitKind::Image, Some(name.as_str()), false, options);
            (plan, prefix, hdu, suffix)
        }
    };
    debug!(
        path = %path.display(),
        ?plan,
        prefix = prefix.len(),
        hdu = hdu.len(),
        suffix = suffix.len(),
        "writing image"
    );

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&prefix)?;
    out.write_all(&hdu)?;
    out.write_all(&suffix)?;
    out.flush()?;
    Ok(())
}

fn locate<R: Read + Seek>(reader: &mut R, selector: &HduSelector) -> Result<HeaderUnit> {
    match selector {
        HduSelector::Primary => {
            reader.seek(SeekFrom::Start(0))?;
            scan::scan_header_unit(reader, Expect::Primary)
        }
        HduSelector::Extension(target) => {
            scan::seek_extension(reader, ExtensionKind::Image, target)?
                .map(|location| location.unit)
                .ok_or_else(|| FitsError::NotFound(describe(target)))
        }
    }
}

fn describe(target: &ExtensionTarget) -> String {
    match target {
        ExtensionTarget::Name(name) if name.is_empty() => String::from("unnamed image extension"),
        ExtensionTarget::Name(name) => format!("image extension {name:?}"),
        ExtensionTarget::Ordinal(n) => format!("image extension #{n}"),
    }
}

/// Read the header of the selected HDU.
pub fn read_header(
    path: impl AsRef<Path>,
    selector: &HduSelector,
    options: &CodecOptions,
) -> Result<Header> {
    let mut reader = open(path.as_ref())?;
    locate(&mut reader, selector)?.header(options)
}

/// Read the selected image HDU, optionally only a window of it.
pub fn read_image(
    path: impl AsRef<Path>,
    selector: &HduSelector,
    range: Option<PixelRange>,
    options: &CodecOptions,
) -> Result<ImageDataUnit> {
    let mut reader = open(path.as_ref())?;
    let unit = locate(&mut reader, selector)?;
    let header = unit.header(options)?;
    reader.seek(SeekFrom::Start(unit.data_start))?;
    ImageDataUnit::read_from(&mut reader, header, range, options)
}

/// `EXTNAME` of every extension of `kind` in the file, in order.
pub fn extension_names(path: impl AsRef<Path>, kind: ExtensionKind) -> Result<Vec<String>> {
    let mut reader = open(path.as_ref())?;
    scan::extension_names(&mut reader, kind)
}

/// Every HDU in the file.
pub fn scan_file(path: impl AsRef<Path>) -> Result<Vec<HeaderUnit>> {
    let mut reader = open(path.as_ref())?;
    scan::scan_all(&mut reader)
}
