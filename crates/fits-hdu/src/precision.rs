//! Mapping between in-memory precisions and the on-disk
//! `BITPIX`/`BZERO`/`BSCALE` triple.

use std::fmt;

use crate::card::HeaderCard;
use crate::error::{FitsError, Result};
use crate::header::{is_structural, Header};
use crate::value::ValueKind;

/// `2^63`, the bias that stores `u64` values in signed 64-bit words.
const UINT64_BIAS: f64 = 9_223_372_036_854_775_808.0;

/// Relative tolerance when matching a header's `BZERO` to a canonical bias.
/// `BZERO` for `UInt64` is written in scientific notation and loses digits.
const BIAS_TOLERANCE: f64 = 1e-12;

/// The element type an image is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskPrecision {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
}

impl DiskPrecision {
    pub const ALL: [DiskPrecision; 11] = [
        DiskPrecision::Boolean,
        DiskPrecision::SByte,
        DiskPrecision::Byte,
        DiskPrecision::Int16,
        DiskPrecision::UInt16,
        DiskPrecision::Int32,
        DiskPrecision::UInt32,
        DiskPrecision::Int64,
        DiskPrecision::UInt64,
        DiskPrecision::Single,
        DiskPrecision::Double,
    ];

    pub fn bitpix(self) -> i64 {
        match self {
            DiskPrecision::Boolean | DiskPrecision::SByte | DiskPrecision::Byte => 8,
            DiskPrecision::Int16 | DiskPrecision::UInt16 => 16,
            DiskPrecision::Int32 | DiskPrecision::UInt32 => 32,
            DiskPrecision::Int64 | DiskPrecision::UInt64 => 64,
            DiskPrecision::Single => -32,
            DiskPrecision::Double => -64,
        }
    }

    /// The `BZERO` offset that shifts the stored signed range onto this
    /// precision's range.
    pub fn bzero(self) -> f64 {
        match self {
            DiskPrecision::SByte => -128.0,
            DiskPrecision::UInt16 => 32_768.0,
            DiskPrecision::UInt32 => 2_147_483_648.0,
            DiskPrecision::UInt64 => UINT64_BIAS,
            _ => 0.0,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.bitpix().unsigned_abs() as usize / 8
    }

    pub fn is_float(self) -> bool {
        self.bitpix() < 0
    }

    /// Resolve the precision declared by a header.
    ///
    /// Integer `BITPIX` values need `BZERO` to be 0 or the canonical bias for
    /// that width; float `BITPIX` values accept any `BZERO`.
    pub fn from_bitpix_bzero(bitpix: i64, bzero: f64) -> Result<Self> {
        let candidates: &[DiskPrecision] = match bitpix {
            8 => &[DiskPrecision::Byte, DiskPrecision::SByte],
            16 => &[DiskPrecision::Int16, DiskPrecision::UInt16],
            32 => &[DiskPrecision::Int32, DiskPrecision::UInt32],
            64 => &[DiskPrecision::Int64, DiskPrecision::UInt64],
            -32 => return Ok(DiskPrecision::Single),
            -64 => return Ok(DiskPrecision::Double),
            other => return Err(FitsError::InvalidBitpix(other)),
        };
        candidates
            .iter()
            .copied()
            .find(|p| same_bias(p.bzero(), bzero))
            .ok_or_else(|| {
                FitsError::Precision(format!("BITPIX {bitpix} with BZERO {bzero} is not supported"))
            })
    }
}

fn same_bias(canonical: f64, declared: f64) -> bool {
    (canonical - declared).abs() <= BIAS_TOLERANCE * canonical.abs().max(1.0)
}

impl fmt::Display for DiskPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiskPrecision::Boolean => "boolean",
            DiskPrecision::SByte => "int8",
            DiskPrecision::Byte => "uint8",
            DiskPrecision::Int16 => "int16",
            DiskPrecision::UInt16 => "uint16",
            DiskPrecision::Int32 => "int32",
            DiskPrecision::UInt32 => "uint32",
            DiskPrecision::Int64 => "int64",
            DiskPrecision::UInt64 => "uint64",
            DiskPrecision::Single => "float32",
            DiskPrecision::Double => "float64",
        };
        f.write_str(name)
    }
}

fn is_axis_or_scaling(name: &str) -> bool {
    match name {
        "BZERO" | "BSCALE" => true,
        "NAXIS" => false,
        _ => name.starts_with("NAXIS") && is_structural(name),
    }
}

/// Make the structural keywords of `header` describe `precision` and `axes`.
///
/// Without axes (or with an empty slice) the header gets `NAXIS = 0` and
/// loses every `NAXISn`, `BZERO` and `BSCALE` card. With axes it gets
/// `BITPIX`, one `NAXISn` per axis after `NAXIS`, `BZERO` set to the
/// precision's bias and `BSCALE = 1`.
pub fn apply_precision(header: &mut Header, precision: DiskPrecision, axes: Option<&[usize]>) {
    let axes = axes.unwrap_or(&[]);
    header.retain_cards(|c| !is_axis_or_scaling(c.name()));

    let first = match header.card(0) {
        Some(c) if c.name() == "SIMPLE" || c.name() == "XTENSION" => 1,
        _ => 0,
    };
    let at = header.upsert(
        HeaderCard::raw(
            "BITPIX",
            &precision.bitpix().to_string(),
            ValueKind::Numeric,
            "bits per data value",
        ),
        first,
    );
    let mut at = header.upsert(
        HeaderCard::raw(
            "NAXIS",
            &axes.len().to_string(),
            ValueKind::Numeric,
            "number of data axes",
        ),
        at + 1,
    ) + 1;

    for (i, n) in axes.iter().enumerate() {
        let card = HeaderCard::raw(
            &format!("NAXIS{}", i + 1),
            &n.to_string(),
            ValueKind::Numeric,
            &format!("length of data axis {}", i + 1),
        );
        header.insert_card(Some(at), card);
        at += 1;
    }

    if axes.is_empty() {
        return;
    }
    while header
        .card(at)
        .is_some_and(|c| c.name() == "PCOUNT" || c.name() == "GCOUNT")
    {
        at += 1;
    }
    header.insert_card(
        Some(at),
        HeaderCard::raw(
            "BZERO",
            &precision.bzero().to_string(),
            ValueKind::Numeric,
            "offset data range to that of unsigned",
        ),
    );
    header.insert_card(
        Some(at + 1),
        HeaderCard::raw("BSCALE", "1", ValueKind::Numeric, "default scaling factor"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(h: &Header) -> Vec<&str> {
        h.cards().iter().map(|c| c.name()).collect()
    }

    #[test]
    fn bitpix_and_bias_table() {
        let expected = [
            (DiskPrecision::Boolean, 8, 0.0),
            (DiskPrecision::SByte, 8, -128.0),
            (DiskPrecision::Byte, 8, 0.0),
            (DiskPrecision::Int16, 16, 0.0),
            (DiskPrecision::UInt16, 16, 32768.0),
            (DiskPrecision::Int32, 32, 0.0),
            (DiskPrecision::UInt32, 32, 2147483648.0),
            (DiskPrecision::Int64, 64, 0.0),
            (DiskPrecision::UInt64, 64, 9223372036854775808.0),
            (DiskPrecision::Single, -32, 0.0),
            (DiskPrecision::Double, -64, 0.0),
        ];
        for (p, bitpix, bzero) in expected {
            assert_eq!(p.bitpix(), bitpix, "{p}");
            assert_eq!(p.bzero(), bzero, "{p}");
            assert_eq!(p.bytes_per_pixel() as i64 * 8, bitpix.abs());
        }
    }

    #[test]
    fn from_bitpix_bzero_resolves_every_precision() {
        for p in DiskPrecision::ALL {
            let resolved = DiskPrecision::from_bitpix_bzero(p.bitpix(), p.bzero()).unwrap();
            let expected = if p == DiskPrecision::Boolean {
                DiskPrecision::Byte
            } else {
                p
            };
            assert_eq!(resolved, expected);
        }
    }

    #[test]
    fn from_bitpix_bzero_tolerates_rounded_uint64_bias() {
        let p = DiskPrecision::from_bitpix_bzero(64, 9.2233720368548e18).unwrap();
        assert_eq!(p, DiskPrecision::UInt64);
    }

    #[test]
    fn from_bitpix_bzero_rejects_unsupported() {
        assert!(matches!(
            DiskPrecision::from_bitpix_bzero(24, 0.0),
            Err(FitsError::InvalidBitpix(24))
        ));
        assert!(matches!(
            DiskPrecision::from_bitpix_bzero(16, 100.0),
            Err(FitsError::Precision(_))
        ));
        assert_eq!(
            DiskPrecision::from_bitpix_bzero(-32, 12.5).unwrap(),
            DiskPrecision::Single
        );
    }

    #[test]
    fn apply_precision_without_axes_strips_shape() {
        let mut h = Header::make_default(true, Some((DiskPrecision::UInt16, &[10, 10][..])));
        apply_precision(&mut h, DiskPrecision::Int32, None);
        assert_eq!(names(&h), ["SIMPLE", "BITPIX", "NAXIS", "EXTEND", "END"]);
        assert_eq!(h.bitpix(), Some(32));
        assert_eq!(h.naxis(), Some(0));
    }

    #[test]
    fn apply_precision_replaces_stale_values() {
        let mut h = Header::make_default(false, Some((DiskPrecision::UInt16, &[10, 10, 3][..])));
        apply_precision(&mut h, DiskPrecision::Single, Some(&[7, 5][..]));
        assert_eq!(
            names(&h),
            ["SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "BZERO", "BSCALE", "END"]
        );
        assert_eq!(h.bitpix(), Some(-32));
        assert_eq!(h.axes(), vec![7, 5]);
        assert_eq!(h.bzero(), 0.0);
    }

    #[test]
    fn apply_precision_keeps_group_keywords_next_to_axes() {
        let mut h = Header::make_default(false, Some((DiskPrecision::Int16, &[2, 2][..])));
        h.formatted_block(crate::header::UnitKind::Image, true);
        apply_precision(&mut h, DiskPrecision::UInt32, Some(&[4, 4][..]));
        assert_eq!(
            names(&h),
            [
                "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "PCOUNT", "GCOUNT", "BZERO",
                "BSCALE", "END"
            ]
        );
        assert_eq!(h.bzero(), 2147483648.0);
    }

    #[test]
    fn uint64_bias_survives_formatting() {
        let mut h = Header::make_default(false, Some((DiskPrecision::UInt64, &[1][..])));
        let lines = h.formatted_block(crate::header::UnitKind::Primary, true).to_vec();
        let parsed = Header::parse(&lines, true, false).unwrap();
        let p = DiskPrecision::from_bitpix_bzero(parsed.bitpix().unwrap(), parsed.bzero()).unwrap();
        assert_eq!(p, DiskPrecision::UInt64);
    }
}
