use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fits_hdu::{
    read_image, scan_file, CodecOptions, ExtensionTarget, HduKind, HduSelector, HeaderCard,
    HeaderUnit,
};
use tracing_subscriber::EnvFilter;

/// Print an HDU summary for a FITS file.
#[derive(Debug, Parser)]
#[command(name = "fitsinfo", version)]
struct Cli {
    /// FITS file to inspect.
    path: PathBuf,

    /// Also print every header card.
    #[arg(short = 'v', long = "header")]
    verbose: bool,

    /// Compute pixel statistics for each image HDU.
    #[arg(long)]
    stats: bool,

    /// Decode and compute statistics on one thread.
    #[arg(long, conflicts_with = "threads")]
    serial: bool,

    /// Size of the worker pool used for decoding and statistics.
    #[arg(long)]
    threads: Option<usize>,
}

impl Cli {
    fn options(&self) -> CodecOptions {
        let mut options = if self.serial {
            CodecOptions::serial()
        } else {
            CodecOptions::default()
        };
        options.threads = self.threads;
        options.skip_malformed_cards = true;
        options
    }
}

fn format_hdu(index: usize, unit: &HeaderUnit) -> String {
    let ext_label = match &unit.extname {
        Some(name) => format!(" (EXTNAME: {name})"),
        None => String::new(),
    };
    let title = match &unit.kind {
        HduKind::Primary => String::from("Primary"),
        HduKind::Image => format!("IMAGE extension{ext_label}"),
        HduKind::BinTable => format!("BINTABLE extension{ext_label}"),
        HduKind::Foreign(kind) => format!("{kind} extension{ext_label}"),
    };
    let mut out = format!("HDU {index}: {title}\n");
    out.push_str(&format!("  BITPIX: {}\n", unit.bitpix));
    out.push_str(&format!("  NAXIS: {}\n", unit.axes.len()));
    if !unit.axes.is_empty() {
        out.push_str(&format!("  Dimensions: {:?}\n", unit.axes));
    }
    if unit.bzero != 0.0 || unit.bscale != 1.0 {
        out.push_str(&format!("  Scaling: BZERO={} BSCALE={}\n", unit.bzero, unit.bscale));
    }
    out.push_str(&format!("  Data size: {} bytes\n", unit.data_len()));
    out
}

fn format_verbose_cards(unit: &HeaderUnit) -> String {
    let mut out = String::from("  Header cards:\n");
    for line in &unit.lines {
        match HeaderCard::parse(line) {
            Ok(card) if card.is_end() => {}
            Ok(card) if card.is_comment() && card.name().is_empty() && card.comment().is_empty() => {}
            Ok(card) => out.push_str(&format!("    {}\n", card.format().trim_end())),
            Err(_) => out.push_str(&format!("    {} (malformed)\n", line.trim_end())),
        }
    }
    out
}

fn format_stats(selector: &HduSelector, cli: &Cli, options: &CodecOptions) -> String {
    let image = match read_image(&cli.path, selector, None, options) {
        Ok(image) => image,
        Err(e) => return format!("  Statistics: unavailable ({e})\n"),
    };
    match image.statistics(options) {
        Some(s) => format!(
            "  Statistics: count={} min={} max={} mean={:.6} stdev={:.6} median={}\n",
            s.count, s.min, s.max, s.mean, s.stdev, s.median
        ),
        None => String::from("  Statistics: no valid pixels\n"),
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let options = cli.options();
    let units = scan_file(&cli.path)
        .with_context(|| format!("reading '{}'", cli.path.display()))?;

    let mut out = String::new();
    let mut image_ordinal = 0;
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format_hdu(i, unit));
        if cli.verbose {
            out.push_str(&format_verbose_cards(unit));
        }
        let selector = match unit.kind {
            HduKind::Primary => Some(HduSelector::Primary),
            HduKind::Image => {
                image_ordinal += 1;
                Some(HduSelector::Extension(ExtensionTarget::Ordinal(image_ordinal)))
            }
            _ => None,
        };
        if let Some(selector) = selector.filter(|_| cli.stats && !unit.axes.is_empty()) {
            out.push_str(&format_stats(&selector, cli, &options));
        }
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    print!("{}", run(&cli)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fits_hdu::{write_image, DiskPrecision, ImageDataUnit, WriteTarget};

    fn cli(path: PathBuf) -> Cli {
        Cli {
            path,
            verbose: false,
            stats: false,
            serial: false,
            threads: None,
        }
    }

    fn sample_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("sample.fits");
        let opts = CodecOptions::default();
        let primary = ImageDataUnit::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0], DiskPrecision::Int16)
            .unwrap();
        write_image(&path, &primary, &WriteTarget::Primary, DiskPrecision::Int16, &opts).unwrap();
        let sci = ImageDataUnit::from_vec(vec![3, 1], vec![10.0, 20.0, 30.0], DiskPrecision::UInt16)
            .unwrap();
        let target = WriteTarget::Extension {
            name: "SCI".into(),
            overwrite: false,
        };
        write_image(&path, &sci, &target, DiskPrecision::UInt16, &opts).unwrap();
        path
    }

    #[test]
    fn summary_lists_every_hdu() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(&cli(sample_file(&dir))).unwrap();
        assert!(out.contains("HDU 0: Primary\n"));
        assert!(out.contains("  BITPIX: 16\n"));
        assert!(out.contains("  Dimensions: [2, 2]\n"));
        assert!(out.contains("HDU 1: IMAGE extension (EXTNAME: SCI)\n"));
        assert!(out.contains("  Scaling: BZERO=32768 BSCALE=1\n"));
        assert!(out.contains("  Data size: 6 bytes\n"));
        assert!(!out.contains("Header cards"));
    }

    #[test]
    fn verbose_prints_cards() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = cli(sample_file(&dir));
        args.verbose = true;
        let out = run(&args).unwrap();
        assert!(out.contains("  Header cards:\n"));
        assert!(out.contains("    XTENSION= 'IMAGE"));
        assert!(!out.contains("    END"));
    }

    #[test]
    fn stats_for_each_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = cli(sample_file(&dir));
        args.stats = true;
        args.serial = true;
        let out = run(&args).unwrap();
        assert!(out.contains("count=4 min=1 max=4 mean=2.500000"));
        assert!(out.contains("count=3 min=10 max=30 mean=20.000000 stdev=10.000000 median=20"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&cli(dir.path().join("absent.fits"))).unwrap_err();
        assert!(format!("{err:#}").contains("absent.fits"));
    }

    #[test]
    fn cli_parses_flags() {
        let parsed = Cli::try_parse_from(["fitsinfo", "-v", "--stats", "--threads", "3", "x.fits"])
            .unwrap();
        assert!(parsed.verbose);
        assert!(parsed.stats);
        assert_eq!(parsed.options().threads, Some(3));
        assert!(Cli::try_parse_from(["fitsinfo", "--serial", "--threads", "2", "x.fits"]).is_err());
    }
}
