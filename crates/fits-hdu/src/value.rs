//! Value-field rules for header cards: kind inference, numeric validation and
//! the 20-character right-justified rendering.

/// Maximum length of a string value between its quotes.
pub const MAX_STRING_LEN: usize = 18;

/// Width of the right-justified value field (columns 11-30).
pub const VALUE_FIELD_WIDTH: usize = 20;

/// How a card's value string is to be interpreted and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Integer, float, complex pair, or an undefined (empty) value.
    Numeric,
    /// `T` or `F`.
    Logical,
    /// Quoted character string.
    Text,
}

impl ValueKind {
    /// Guess the kind of a bare value string, the way the setter path does:
    /// `T`/`F` is logical, anything numeric is numeric, the rest is text.
    pub fn infer(value: &str) -> ValueKind {
        let v = value.trim();
        if v == "T" || v == "F" {
            ValueKind::Logical
        } else if !v.is_empty() && is_numeric_token(v) {
            ValueKind::Numeric
        } else {
            ValueKind::Text
        }
    }
}

/// Parse a FITS real or integer literal. `D` exponents are accepted.
pub fn parse_number(token: &str) -> Option<f64> {
    let t = token.trim();
    let allowed = |b: u8| {
        b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'E' | b'e' | b'D' | b'd')
    };
    if t.is_empty() || !t.bytes().all(allowed) {
        return None;
    }
    let normalized = t.replace(['D', 'd'], "E");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Returns `true` for an empty (undefined) token, a number, or a complex pair.
pub fn is_numeric_token(token: &str) -> bool {
    let t = token.trim();
    if t.is_empty() || parse_number(t).is_some() {
        return true;
    }
    if let Some(inner) = t.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        if let Some((re, im)) = inner.split_once(',') {
            return parse_number(re).is_some() && parse_number(im).is_some();
        }
    }
    false
}

/// Render a number in the card's numeric notation.
///
/// Exact zero is `0`; magnitudes at or below 1e-4 or at or above 1e13 use
/// `0.000##########e+00`; everything else uses the shortest fixed notation
/// that round-trips. Fixed notation wider than the value field falls back to
/// scientific, whose mantissa is shortened until it fits.
pub fn format_number(v: f64) -> String {
    if v == 0.0 {
        return String::from("0");
    }
    let a = v.abs();
    if a > 1e-4 && a < 1e13 {
        let fixed = format!("{v}");
        if fixed.len() <= VALUE_FIELD_WIDTH {
            return fixed;
        }
    }
    (3..=13)
        .rev()
        .map(|digits| format_scientific(v, digits))
        .find(|s| s.len() <= VALUE_FIELD_WIDTH)
        .unwrap_or_else(|| format_scientific(v, 3))
}

fn format_scientific(v: f64, digits: usize) -> String {
    let raw = format!("{v:.digits$e}");
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let (int_part, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut frac = frac.trim_end_matches('0').to_string();
    while frac.len() < 3 {
        frac.push('0');
    }
    let exp: i32 = exponent.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{int_part}.{frac}e{sign}{:02}", exp.unsigned_abs())
}

/// Render a numeric token: parseable numbers are normalized, anything else
/// (complex pairs, undefined values) is emitted as written.
pub fn format_numeric_token(token: &str) -> String {
    match parse_number(token) {
        Some(v) => format_number(v),
        None => token.trim().to_string(),
    }
}

/// Quote a string value, doubling inner quotes and padding to
/// [`MAX_STRING_LEN`] inside the quotes.
pub fn quote(text: &str) -> String {
    let escaped = text.replace('\'', "''");
    format!("'{:<width$}'", escaped, width = MAX_STRING_LEN)
}

/// Build the right-justified value field for a card.
pub fn format_value_field(kind: ValueKind, value: &str) -> String {
    let rendered = match kind {
        ValueKind::Numeric => format_numeric_token(value),
        ValueKind::Logical => value.trim().to_string(),
        ValueKind::Text => quote(value),
    };
    format!("{:>width$}", rendered, width = VALUE_FIELD_WIDTH)
}

/// Split a quoted string at the start of `field` into its unescaped content
/// and the remainder after the closing quote.
///
/// Returns `None` when the closing quote is missing.
pub(crate) fn split_quoted(field: &str) -> Option<(String, &str)> {
    let body = field.strip_prefix('\'')?;
    let bytes = body.as_bytes();
    let mut content = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                content.push('\'');
                i += 2;
                continue;
            }
            return Some((content, &body[i + 1..]));
        }
        content.push(bytes[i] as char);
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_kinds() {
        assert_eq!(ValueKind::infer("T"), ValueKind::Logical);
        assert_eq!(ValueKind::infer("F"), ValueKind::Logical);
        assert_eq!(ValueKind::infer("-64"), ValueKind::Numeric);
        assert_eq!(ValueKind::infer("2.5E-3"), ValueKind::Numeric);
        assert_eq!(ValueKind::infer("(1, 2)"), ValueKind::Numeric);
        assert_eq!(ValueKind::infer("NGC 1234"), ValueKind::Text);
        assert_eq!(ValueKind::infer(""), ValueKind::Text);
    }

    #[test]
    fn parse_number_accepts_fits_literals() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number(" -3.5 "), Some(-3.5));
        assert_eq!(parse_number("1.5D+02"), Some(150.0));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("12abc"), None);
    }

    #[test]
    fn numeric_tokens() {
        assert!(is_numeric_token(""));
        assert!(is_numeric_token("(1.0, -2.0)"));
        assert!(!is_numeric_token("(1.0 -2.0)"));
        assert!(!is_numeric_token("hello"));
    }

    #[test]
    fn format_number_fixed_range() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-64.0), "-64");
        assert_eq!(format_number(32768.0), "32768");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(0.00012), "0.00012");
        assert_eq!(format_number(2147483648.0), "2147483648");
    }

    #[test]
    fn format_number_scientific_range() {
        assert_eq!(format_number(1e-4), "1.000e-04");
        assert_eq!(format_number(1.5e-5), "1.500e-05");
        assert_eq!(format_number(1e13), "1.000e+13");
        assert_eq!(format_number(-2.5e20), "-2.500e+20");
        assert_eq!(format_number(1.2345678901234e15), "1.2345678901234e+15");
        assert_eq!(format_number(1e100), "1.000e+100");
    }

    #[test]
    fn format_number_fits_the_value_field() {
        for v in [
            0.00012345678901234568,
            -0.00012345678901234568,
            123456.78901234567,
            -1.2345678901234567e-100,
            f64::MIN_POSITIVE,
            -f64::MAX,
        ] {
            let s = format_number(v);
            assert!(s.len() <= VALUE_FIELD_WIDTH, "{v} -> {s}");
            let back = parse_number(&s).unwrap();
            assert!(((back - v) / v).abs() < 1e-9, "{v} -> {s}");
        }
        assert_eq!(format_number(0.00012345678901234568), "1.2345678901235e-04");
    }

    #[test]
    fn format_numeric_token_passes_through_complex() {
        assert_eq!(format_numeric_token("(1, 2)"), "(1, 2)");
        assert_eq!(format_numeric_token("1.0"), "1");
    }

    #[test]
    fn quote_pads_and_escapes() {
        assert_eq!(quote("IMAGE"), "'IMAGE             '");
        assert_eq!(quote("IMAGE").len(), 20);
        assert_eq!(quote("it's"), "'it''s             '");
    }

    #[test]
    fn value_field_is_right_justified() {
        let f = format_value_field(ValueKind::Logical, "T");
        assert_eq!(f.len(), VALUE_FIELD_WIDTH);
        assert!(f.ends_with('T'));
        let f = format_value_field(ValueKind::Numeric, "-64");
        assert_eq!(f, "                 -64");
        let f = format_value_field(ValueKind::Text, "SCI");
        assert_eq!(f, "'SCI               '");
    }

    #[test]
    fn split_quoted_handles_doubled_quotes() {
        let (s, rest) = split_quoted("'it''s ok '  / note").unwrap();
        assert_eq!(s, "it's ok ");
        assert_eq!(rest, "  / note");
        assert!(split_quoted("'never closed").is_none());
        assert!(split_quoted("no quote").is_none());
    }
}
