//! Sequential HDU scanning and extension lookup over seekable streams.
//!
//! The scanner reads 80-byte cards up to `END`, pulls out the structural
//! keywords it needs to size the data unit, and records byte offsets so the
//! write path can splice units without decoding them.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use tracing::{debug, trace};

use crate::block::{padded_offset, BLOCK_SIZE, CARD_SIZE};
use crate::card::HeaderCard;
use crate::config::CodecOptions;
use crate::error::{FitsError, Result};
use crate::header::Header;

/// Largest `NAXIS` the standard allows.
const MAX_AXES: usize = 999;

/// Which unit a scan expects to find at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Primary,
    Extension,
}

/// Kind of a scanned HDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HduKind {
    Primary,
    Image,
    BinTable,
    /// Any other `XTENSION` value; walked past but never decoded.
    Foreign(String),
}

/// Extension kinds that can be looked up by name or ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Image,
    BinTable,
}

impl ExtensionKind {
    fn matches(self, kind: &HduKind) -> bool {
        matches!(
            (self, kind),
            (ExtensionKind::Image, HduKind::Image) | (ExtensionKind::BinTable, HduKind::BinTable)
        )
    }
}

/// How to pick an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionTarget {
    /// By `EXTNAME`; the empty name matches unnamed extensions only.
    Name(String),
    /// By one-based position among extensions of the same kind.
    Ordinal(usize),
}

impl From<&str> for ExtensionTarget {
    fn from(name: &str) -> Self {
        ExtensionTarget::Name(name.to_string())
    }
}

/// One scanned header and the layout of the data unit that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderUnit {
    pub kind: HduKind,
    /// Raw 80-character card lines up to and including `END`.
    pub lines: Vec<String>,
    pub bitpix: i64,
    pub axes: Vec<usize>,
    pub bscale: f64,
    pub bzero: f64,
    pub pcount: u64,
    pub gcount: u64,
    pub extend: bool,
    pub extname: Option<String>,
    /// Offset of the first header card.
    pub header_start: u64,
    /// Offset of the first data byte.
    pub data_start: u64,
    /// Offset just past the padded data unit.
    pub data_end: u64,
}

impl HeaderUnit {
    fn new(kind: HduKind, header_start: u64) -> Self {
        HeaderUnit {
            kind,
            lines: Vec::new(),
            bitpix: 8,
            axes: Vec::new(),
            bscale: 1.0,
            bzero: 0.0,
            pcount: 0,
            gcount: 1,
            extend: false,
            extname: None,
            header_start,
            data_start: header_start,
            data_end: header_start,
        }
    }

    /// Unpadded size of the data unit in bytes.
    ///
    /// Saturates at `u64::MAX`; the scanner rejects headers whose size
    /// does not fit.
    pub fn data_len(&self) -> u64 {
        self.checked_data_len().unwrap_or(u64::MAX)
    }

    fn checked_data_len(&self) -> Option<u64> {
        if self.axes.is_empty() {
            return Some(0);
        }
        let pixels = self
            .axes
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n as u64))?;
        (self.bitpix.unsigned_abs() / 8)
            .checked_mul(self.gcount.max(1))?
            .checked_mul(self.pcount.checked_add(pixels)?)
    }

    /// The `EXTNAME` of this unit, or `""` when unnamed.
    pub fn name(&self) -> &str {
        self.extname.as_deref().unwrap_or("")
    }

    /// Build a [`Header`] from the scanned lines.
    pub fn header(&self, options: &CodecOptions) -> Result<Header> {
        let mut header = Header::parse(
            &self.lines,
            options.populate_nonessential,
            options.skip_malformed_cards,
        )?;
        header.set_warn_on_restricted(options.warn_on_restricted);
        Ok(header)
    }

    fn record(&mut self, card: &HeaderCard, line: &str) -> Result<()> {
        let name = card.name();
        match name {
            "BITPIX" => self.bitpix = card.as_i64().unwrap_or(self.bitpix),
            "NAXIS" => {
                let n = card
                    .as_i64()
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|&n| n <= MAX_AXES)
                    .ok_or_else(|| FitsError::format(line, format!("NAXIS must be 0..={MAX_AXES}")))?;
                self.axes.resize(n, 0);
            }
            "BSCALE" => self.bscale = card.as_f64().unwrap_or(1.0),
            "BZERO" => self.bzero = card.as_f64().unwrap_or(0.0),
            "PCOUNT" => self.pcount = card.as_i64().and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
            "GCOUNT" => self.gcount = card.as_i64().and_then(|v| u64::try_from(v).ok()).unwrap_or(1),
            "EXTEND" => self.extend = card.as_bool().unwrap_or(false),
            "EXTNAME" => self.extname = Some(card.value().to_string()),
            _ => {
                if let Some(i) = name
                    .strip_prefix("NAXIS")
                    .and_then(|n| n.parse::<usize>().ok())
                {
                    if (1..=self.axes.len()).contains(&i) {
                        self.axes[i - 1] = card
                            .as_i64()
                            .and_then(|v| usize::try_from(v).ok())
                            .unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where a matched extension lives in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionLocation {
    /// One-based position among extensions of the same kind.
    pub ordinal: usize,
    pub unit: HeaderUnit,
}

impl ExtensionLocation {
    pub fn header_start(&self) -> u64 {
        self.unit.header_start
    }

    pub fn data_start(&self) -> u64 {
        self.unit.data_start
    }

    pub fn data_end(&self) -> u64 {
        self.unit.data_end
    }
}

/// Read one card, or `None` at a clean end of stream.
fn read_card<R: Read>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = [0u8; CARD_SIZE];
    let mut filled = 0;
    while filled < CARD_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        CARD_SIZE => Ok(Some(String::from_utf8_lossy(&buf).into_owned())),
        _ => Err(FitsError::UnexpectedEof),
    }
}

fn classify(first: &HeaderCard, line: &str, expect: Expect) -> Result<HduKind> {
    match (expect, first.name()) {
        (Expect::Primary, "SIMPLE") => Ok(HduKind::Primary),
        (Expect::Extension, "XTENSION") => Ok(match first.value().trim() {
            "IMAGE" => HduKind::Image,
            "BINTABLE" => HduKind::BinTable,
            other => HduKind::Foreign(other.to_string()),
        }),
        (Expect::Primary, _) => Err(FitsError::format(line, "expected SIMPLE as the first card")),
        (Expect::Extension, _) => Err(FitsError::format(line, "expected XTENSION as the first card")),
    }
}

/// Scan the unit at the current position, returning `None` when the stream
/// is already at its end.
fn scan_unit<R: Read + Seek>(reader: &mut R, expect: Expect) -> Result<Option<HeaderUnit>> {
    let header_start = reader.stream_position()?;
    let Some(first_line) = read_card(reader)? else {
        return Ok(None);
    };
    if expect == Expect::Extension && first_line.bytes().all(|b| b == 0 || b == b' ') {
        debug!(offset = header_start, "blank filler after the last unit");
        reader.seek(SeekFrom::End(0))?;
        return Ok(None);
    }
    let first = HeaderCard::parse(&first_line)?;
    let mut unit = HeaderUnit::new(classify(&first, &first_line, expect)?, header_start);
    unit.lines.push(first_line);

    loop {
        let line = read_card(reader)?.ok_or(FitsError::MissingEnd)?;
        let name = line.get(..8).unwrap_or("").trim_end();
        let is_end = name == "END";
        if matches!(
            name,
            "BITPIX" | "BSCALE" | "BZERO" | "PCOUNT" | "GCOUNT" | "EXTEND" | "EXTNAME"
        ) || name.starts_with("NAXIS")
        {
            let card = HeaderCard::parse(&line)?;
            trace!(name = card.name(), value = card.value(), "structural card");
            unit.record(&card, &line)?;
        }
        unit.lines.push(line);
        if is_end {
            break;
        }
    }

    let header_len = (unit.lines.len() * CARD_SIZE) as u64;
    unit.data_start = header_start + padded_offset(header_len);
    unit.data_end = unit
        .checked_data_len()
        .and_then(|len| len.div_ceil(BLOCK_SIZE as u64).checked_mul(BLOCK_SIZE as u64))
        .and_then(|len| unit.data_start.checked_add(len))
        .ok_or_else(|| {
            FitsError::format(&unit.lines[0], format!("data unit size overflows: axes {:?}", unit.axes))
        })?;
    reader.seek(SeekFrom::Start(unit.data_start))?;
    debug!(
        kind = ?unit.kind,
        extname = unit.name(),
        header_start = unit.header_start,
        data_start = unit.data_start,
        data_end = unit.data_end,
        "scanned header unit"
    );
    Ok(Some(unit))
}

/// Scan the header at the current stream position and leave the stream at
/// the start of its data unit.
pub fn scan_header_unit<R: Read + Seek>(reader: &mut R, expect: Expect) -> Result<HeaderUnit> {
    scan_unit(reader, expect)?.ok_or(FitsError::UnexpectedEof)
}

/// Scan the next extension after skipping to the end of `previous`.
fn next_extension<R: Read + Seek>(reader: &mut R, previous: &HeaderUnit) -> Result<Option<HeaderUnit>> {
    reader.seek(SeekFrom::Start(previous.data_end))?;
    scan_unit(reader, Expect::Extension)
}

/// Find an extension of `kind` by name or ordinal.
///
/// On a match the stream is left at the extension's data start. Without one
/// the result is `None` and the stream has been walked to its end.
pub fn seek_extension<R: Read + Seek>(
    reader: &mut R,
    kind: ExtensionKind,
    target: &ExtensionTarget,
) -> Result<Option<ExtensionLocation>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut current = scan_header_unit(reader, Expect::Primary)?;
    let mut ordinal = 0;
    while let Some(unit) = next_extension(reader, &current)? {
        if kind.matches(&unit.kind) {
            ordinal += 1;
            let hit = match target {
                ExtensionTarget::Name(name) => unit.name() == name.trim(),
                ExtensionTarget::Ordinal(n) => *n == ordinal,
            };
            if hit {
                debug!(wanted = ?target, ordinal, "extension found");
                reader.seek(SeekFrom::Start(unit.data_start))?;
                return Ok(Some(ExtensionLocation { ordinal, unit }));
            }
        }
        current = unit;
    }
    debug!(wanted = ?target, "extension not found");
    Ok(None)
}

/// `EXTNAME` of every extension of `kind`, in file order. Unnamed
/// extensions contribute empty strings.
pub fn extension_names<R: Read + Seek>(reader: &mut R, kind: ExtensionKind) -> Result<Vec<String>> {
    Ok(scan_all(reader)?
        .into_iter()
        .filter(|u| kind.matches(&u.kind))
        .map(|u| u.name().to_string())
        .collect())
}

/// Scan every HDU in the stream, starting from its beginning.
pub fn scan_all<R: Read + Seek>(reader: &mut R) -> Result<Vec<HeaderUnit>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut units = vec![scan_header_unit(reader, Expect::Primary)?];
    while let Some(unit) = next_extension(reader, &units[units.len() - 1])? {
        units.push(unit);
    }
    Ok(units)
}
