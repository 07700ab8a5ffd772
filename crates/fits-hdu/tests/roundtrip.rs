//! End-to-end tests through real files: headers and pixels written by this
//! crate must read back unchanged.

use fits_hdu::{
    read_header, read_image, scan_file, write_image, CodecOptions, DiskPrecision, FitsError,
    HduSelector, Header, HeaderCard, ImageDataUnit, PixelRange, UnitKind, WriteTarget, BLOCK_SIZE,
    CARD_SIZE,
};

fn ramp(width: usize, height: usize) -> ImageDataUnit {
    let data = (0..width * height).map(|i| i as f64).collect();
    ImageDataUnit::from_vec(vec![width, height], data, DiskPrecision::Double).unwrap()
}

#[test]
fn sample_card_reformats_identically() {
    let line = format!("{:<80}", "BITPIX  =                   16 / bits per data value");
    let card = HeaderCard::parse(&line).unwrap();
    assert_eq!(card.name(), "BITPIX");
    assert_eq!(card.as_i64(), Some(16));
    assert_eq!(card.comment(), "bits per data value");
    assert_eq!(card.format(), line);
}

#[test]
fn default_header_parses_back() {
    let mut header = Header::make_default(true, Some((DiskPrecision::UInt16, &[64, 32][..])));
    let lines = header.formatted_block(UnitKind::Primary, false).to_vec();
    assert_eq!(lines.len() % 36, 0);
    assert!(lines.iter().all(|l| l.len() == 80));

    let parsed = Header::parse(&lines, true, false).unwrap();
    assert_eq!(parsed, header);
    assert_eq!(parsed.bitpix(), Some(16));
    assert_eq!(parsed.axes(), vec![64, 32]);
    assert_eq!(parsed.bzero(), 32768.0);
    assert!(parsed.has_extend());
}

#[test]
fn uint16_values_are_biased_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("u16.fits");
    let image = ImageDataUnit::from_vec(vec![1], vec![40000.0], DiskPrecision::UInt16).unwrap();
    let opts = CodecOptions::default();
    write_image(&path, &image, &WriteTarget::Primary, DiskPrecision::UInt16, &opts).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
    let stored = i16::from_be_bytes([bytes[BLOCK_SIZE], bytes[BLOCK_SIZE + 1]]);
    assert_eq!(stored, 7232);

    let back = read_image(&path, &HduSelector::Primary, None, &opts).unwrap();
    assert_eq!(back.precision(), DiskPrecision::UInt16);
    assert_eq!(back.data(), &[40000.0]);
}

#[test]
fn every_precision_survives_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let opts = CodecOptions::default();
    let values = [0.0, 1.0, 2.0, 100.0, 120.0, 7.0];
    for precision in DiskPrecision::ALL {
        let path = dir.path().join(format!("{precision}.fits"));
        let image = ImageDataUnit::from_vec(vec![3, 2], values.to_vec(), precision).unwrap();
        write_image(&path, &image, &WriteTarget::Primary, precision, &opts).unwrap();
        let back = read_image(&path, &HduSelector::Primary, None, &opts).unwrap();
        if precision == DiskPrecision::Boolean {
            assert_eq!(back.precision(), DiskPrecision::Byte);
            assert_eq!(back.data(), &[0.0, 1.0, 1.0, 1.0, 1.0, 1.0][..]);
        } else {
            assert_eq!(back.precision(), precision);
            assert_eq!(back.data(), &values[..], "{precision}");
        }
        assert_eq!(back.axes(), &[3, 2][..]);
    }
}

#[test]
fn user_keywords_survive_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.fits");
    let mut image = ramp(4, 3);
    let header = image.header_mut();
    header
        .set_key("OBSERVER", "Hubble", Some("who looked"), None)
        .unwrap();
    header.set_key("EXPTIME", "30.5", None, None).unwrap();
    header.add_comment_line("calibrated frame", None).unwrap();
    let opts = CodecOptions::default();
    write_image(&path, &image, &WriteTarget::Primary, DiskPrecision::Single, &opts).unwrap();

    let header = read_header(&path, &HduSelector::Primary, &opts).unwrap();
    assert_eq!(header.value("OBSERVER"), Some("Hubble"));
    assert_eq!(header.comment("OBSERVER"), Some("who looked"));
    assert_eq!(header.value("EXPTIME"), Some("30.5"));
    assert!(header
        .cards()
        .iter()
        .any(|c| c.is_comment() && c.comment().contains("calibrated frame")));
    assert_eq!(header.bitpix(), Some(-32));

    let essential = CodecOptions {
        populate_nonessential: false,
        ..CodecOptions::default()
    };
    let header = read_header(&path, &HduSelector::Primary, &essential).unwrap();
    assert_eq!(header.value("OBSERVER"), None);
    assert_eq!(header.axes(), vec![4, 3]);
}

#[test]
fn sub_range_matches_full_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ramp.fits");
    let opts = CodecOptions::default();
    write_image(&path, &ramp(10, 8), &WriteTarget::Primary, DiskPrecision::Int32, &opts).unwrap();

    let full = read_image(&path, &HduSelector::Primary, None, &opts).unwrap();
    let range = PixelRange::new(2, 5, 3, 6);
    let window = read_image(&path, &HduSelector::Primary, Some(range), &opts).unwrap();
    assert_eq!(window.axes(), &[4, 4][..]);
    assert_eq!(window.header().axes(), vec![4, 4]);
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(window.get(x, y), full.get(x + 2, y + 3));
        }
    }

    let outside = read_image(&path, &HduSelector::Primary, Some(PixelRange::new(0, 10, 0, 0)), &opts);
    assert!(matches!(outside, Err(FitsError::InvalidRange(_))));
}

#[test]
fn truncated_data_unit_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.fits");
    let opts = CodecOptions::default();
    write_image(&path, &ramp(50, 50), &WriteTarget::Primary, DiskPrecision::Double, &opts).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..BLOCK_SIZE + 100]).unwrap();

    let err = read_image(&path, &HduSelector::Primary, None, &opts);
    assert!(matches!(err, Err(FitsError::UnexpectedEof)));
}

#[test]
fn statistics_agree_across_thread_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.fits");
    let opts = CodecOptions::default();
    write_image(&path, &ramp(300, 40), &WriteTarget::Primary, DiskPrecision::Single, &opts).unwrap();

    let serial = CodecOptions::serial();
    let pooled = CodecOptions {
        threads: Some(3),
        ..CodecOptions::default()
    };
    let a = read_image(&path, &HduSelector::Primary, None, &serial).unwrap();
    let b = read_image(&path, &HduSelector::Primary, None, &pooled).unwrap();
    assert_eq!(a.data(), b.data());

    let sa = a.statistics(&serial).unwrap();
    let sb = b.statistics(&pooled).unwrap();
    assert_eq!(sa.count, 12_000);
    assert_eq!(sa.min, 0.0);
    assert_eq!(sa.max, 11_999.0);
    assert_eq!(sa.median, 5999.5);
    assert_eq!(sa.count, sb.count);
    assert_eq!(sa.median, sb.median);
    assert!((sa.mean - sb.mean).abs() < 1e-9);
    assert!((sa.stdev - sb.stdev).abs() < 1e-6);
}

#[test]
fn early_user_keyword_keeps_mandatory_order_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("order.fits");
    let mut image = ramp(4, 3);
    image
        .header_mut()
        .set_key("OBSERVER", "Hubble", None, Some(1))
        .unwrap();
    let opts = CodecOptions::default();
    write_image(&path, &image, &WriteTarget::Primary, DiskPrecision::Single, &opts).unwrap();
    let sci = WriteTarget::Extension {
        name: "SCI".into(),
        overwrite: false,
    };
    write_image(&path, &image, &sci, DiskPrecision::Int16, &opts).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let names = |start: u64, count: usize| -> Vec<String> {
        (0..count)
            .map(|i| {
                let at = start as usize + i * CARD_SIZE;
                String::from_utf8_lossy(&bytes[at..at + 8]).trim_end().to_string()
            })
            .collect()
    };
    let units = scan_file(&path).unwrap();
    assert_eq!(
        names(units[0].header_start, 5),
        ["SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2"]
    );
    assert_eq!(
        names(units[1].header_start, 7),
        ["XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "PCOUNT", "GCOUNT"]
    );
    for unit in &units {
        let observer = unit.lines.iter().position(|l| l.starts_with("OBSERVER"));
        assert!(observer.is_some_and(|i| i >= 5), "{unit:?}");
    }
}
