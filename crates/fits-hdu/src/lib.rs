//! Reading and writing FITS header/data units.
//!
//! A FITS file is a sequence of HDUs, each an 80-character-card header
//! followed by a big-endian data unit, both padded to 2880-byte blocks. This
//! crate parses and formats header cards ([`HeaderCard`]), keeps the
//! structural keywords of a [`Header`] consistent with the data it describes,
//! decodes and encodes image data at every [`DiskPrecision`], and splices a
//! new or replaced HDU into an existing file without touching the others
//! ([`write_image`]).
//!
//! ```no_run
//! use fits_hdu::{write_image, CodecOptions, DiskPrecision, ImageDataUnit, WriteTarget};
//!
//! let image = ImageDataUnit::new(100, 50, DiskPrecision::Double);
//! let target = WriteTarget::Extension { name: "SCI".into(), overwrite: true };
//! write_image("out.fits", &image, &target, DiskPrecision::Single, &CodecOptions::default())?;
//! # Ok::<(), fits_hdu::FitsError>(())
//! ```

pub mod block;
pub mod card;
pub mod config;
pub mod endian;
pub mod error;
pub mod file;
pub mod header;
pub mod image;
pub mod precision;
pub mod scan;
pub mod stats;
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use card::HeaderCard;
pub use config::{CodecOptions, WorkerPool};
pub use error::{FitsError, Result};
pub use file::{
    extension_names, read_header, read_image, scan_file, write_image, HduSelector, WriteTarget,
};
pub use header::{Header, UnitKind};
pub use image::{ImageDataUnit, PixelRange};
pub use precision::{apply_precision, DiskPrecision};
pub use scan::{ExtensionKind, ExtensionLocation, ExtensionTarget, HduKind, HeaderUnit};
pub use stats::ImageStatistics;
pub use value::ValueKind;
