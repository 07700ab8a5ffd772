//! Parsing and formatting of single 80-character header cards.

use std::fmt;

use crate::block::CARD_SIZE;
use crate::error::{FitsError, Result};
use crate::value::{format_value_field, is_numeric_token, split_quoted, ValueKind, MAX_STRING_LEN};

/// Longest keyword name.
pub const MAX_NAME_LEN: usize = 8;

/// Longest comment accepted by the setters for a value card.
pub const MAX_VALUE_COMMENT_LEN: usize = 48;

/// Keywords whose cards are commentary even when column 9 holds `=`.
const COMMENTARY_NAMES: [&str; 3] = ["COMMENT", "HISTORY", ""];

/// One 80-character FITS header card.
///
/// Value cards carry a keyword `name`, a semantic `value` string tagged with
/// its [`ValueKind`], and a `comment`. Comment-format cards have an empty
/// name and keep their whole text in `comment`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCard {
    name: String,
    value: String,
    kind: ValueKind,
    comment: String,
    is_comment: bool,
}

impl HeaderCard {
    /// Compose a value card, inferring the value kind.
    pub fn new(name: &str, value: &str, comment: &str) -> Result<Self> {
        Self::with_kind(name, value, ValueKind::infer(value), comment)
    }

    /// Compose a value card with an explicit value kind.
    pub fn with_kind(name: &str, value: &str, kind: ValueKind, comment: &str) -> Result<Self> {
        let mut card = HeaderCard {
            name: String::new(),
            value: String::new(),
            kind,
            comment: String::new(),
            is_comment: false,
        };
        card.set_name(name)?;
        card.set_value_with_kind(value, kind)?;
        card.set_comment(comment)?;
        Ok(card)
    }

    /// A numeric card.
    pub fn numeric(name: &str, value: f64, comment: &str) -> Result<Self> {
        Self::with_kind(name, &value.to_string(), ValueKind::Numeric, comment)
    }

    /// An integer card; the literal is kept exactly as written.
    pub fn integer(name: &str, value: i64, comment: &str) -> Result<Self> {
        Self::with_kind(name, &value.to_string(), ValueKind::Numeric, comment)
    }

    /// A logical (`T`/`F`) card.
    pub fn logical(name: &str, value: bool, comment: &str) -> Result<Self> {
        let v = if value { "T" } else { "F" };
        Self::with_kind(name, v, ValueKind::Logical, comment)
    }

    /// A quoted string card.
    pub fn text(name: &str, value: &str, comment: &str) -> Result<Self> {
        Self::with_kind(name, value, ValueKind::Text, comment)
    }

    /// A comment-format card holding at most 80 characters of free text.
    pub fn comment_line(text: &str) -> Result<Self> {
        check_ascii(text)?;
        if text.len() > CARD_SIZE {
            return Err(FitsError::Validation(format!(
                "comment line longer than {CARD_SIZE} characters"
            )));
        }
        Ok(HeaderCard {
            name: String::new(),
            value: String::new(),
            kind: ValueKind::Text,
            comment: text.trim_end().to_string(),
            is_comment: true,
        })
    }

    /// Build a card without validation, for keywords the crate writes itself.
    pub(crate) fn raw(name: &str, value: &str, kind: ValueKind, comment: &str) -> Self {
        HeaderCard {
            name: name.to_string(),
            value: value.to_string(),
            kind,
            comment: comment.to_string(),
            is_comment: false,
        }
    }

    /// The terminal END card.
    pub fn end() -> Self {
        HeaderCard {
            name: String::from("END"),
            value: String::new(),
            kind: ValueKind::Numeric,
            comment: String::new(),
            is_comment: false,
        }
    }

    /// Parse one header line.
    ///
    /// Lines shorter than 80 characters are padded with blanks. String values
    /// longer than 18 characters are silently truncated, unlike the setters
    /// which reject them.
    pub fn parse(line: &str) -> Result<Self> {
        if !line.is_ascii() {
            return Err(FitsError::format(line, "card contains non-ASCII characters"));
        }
        if line.len() > CARD_SIZE {
            return Err(FitsError::format(line, "card longer than 80 characters"));
        }
        let padded = format!("{:<width$}", line, width = CARD_SIZE);
        let line = padded.as_str();

        let name = line[..MAX_NAME_LEN].trim();
        if name == "END" {
            return Ok(HeaderCard::end());
        }
        if line.as_bytes()[MAX_NAME_LEN] != b'=' || COMMENTARY_NAMES.contains(&name) {
            return Ok(HeaderCard {
                name: String::new(),
                value: String::new(),
                kind: ValueKind::Text,
                comment: line.trim_end().to_string(),
                is_comment: true,
            });
        }
        if name.bytes().any(|b| !valid_name_byte(b)) {
            return Err(FitsError::format(line, "invalid keyword name"));
        }

        let field = &line[MAX_NAME_LEN + 2..];
        let value_start = field.trim_start();
        let (value, kind, remainder) = if value_start.starts_with('\'') {
            let (content, rest) = split_quoted(value_start)
                .ok_or_else(|| FitsError::format(line, "unterminated string value"))?;
            let mut text = content.trim().to_string();
            text.truncate(MAX_STRING_LEN);
            (text, ValueKind::Text, Some(rest))
        } else {
            let (token, rest) = match field.split_once('/') {
                Some((token, rest)) => (token.trim(), Some(rest)),
                None => (field.trim(), None),
            };
            if token == "T" || token == "F" {
                (token.to_string(), ValueKind::Logical, rest.map(|r| {
                    // Keep the slash so the comment extraction below sees it.
                    &field[field.len() - r.len() - 1..]
                }))
            } else if is_numeric_token(token) {
                (token.to_string(), ValueKind::Numeric, rest.map(|r| {
                    &field[field.len() - r.len() - 1..]
                }))
            } else {
                return Err(FitsError::format(line, format!("unparseable value {token:?}")));
            }
        };

        let comment = remainder
            .and_then(|r| r.split_once('/'))
            .map(|(_, c)| c.trim().to_string())
            .unwrap_or_default();

        Ok(HeaderCard {
            name: name.to_string(),
            value,
            kind,
            comment,
            is_comment: false,
        })
    }

    /// Render the card as exactly 80 characters.
    pub fn format(&self) -> String {
        let mut out = if self.is_comment {
            format!("{}{}", self.name, self.comment)
        } else if self.is_end() {
            String::from("END")
        } else {
            let mut s = format!(
                "{:<width$}= {}",
                self.name,
                format_value_field(self.kind, &self.value),
                width = MAX_NAME_LEN
            );
            if !self.comment.is_empty() {
                s.push_str(" / ");
                s.push_str(&self.comment);
            }
            s
        };
        out.truncate(CARD_SIZE);
        format!("{:<width$}", out, width = CARD_SIZE)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_comment(&self) -> bool {
        self.is_comment
    }

    pub fn is_end(&self) -> bool {
        !self.is_comment && self.name == "END"
    }

    /// The value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Numeric => crate::value::parse_number(&self.value),
            _ => None,
        }
    }

    /// The value as an integer, if it is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        self.value
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| self.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .filter(|_| self.kind == ValueKind::Numeric)
    }

    /// The value as a logical, if it is `T` or `F`.
    pub fn as_bool(&self) -> Option<bool> {
        match (self.kind, self.value.as_str()) {
            (ValueKind::Logical, "T") => Some(true),
            (ValueKind::Logical, "F") => Some(false),
            _ => None,
        }
    }

    /// Rename the card. Names are uppercased and limited to 8 characters.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let name = name.trim().to_ascii_uppercase();
        if name.len() > MAX_NAME_LEN {
            return Err(FitsError::Validation(format!(
                "keyword {name:?} is longer than {MAX_NAME_LEN} characters"
            )));
        }
        if name.bytes().any(|b| !valid_name_byte(b)) {
            return Err(FitsError::Validation(format!("invalid keyword name {name:?}")));
        }
        self.name = name;
        Ok(())
    }

    /// Replace the value, inferring its kind.
    ///
    /// A non-numeric value longer than 18 characters is rejected.
    pub fn set_value(&mut self, value: &str) -> Result<()> {
        self.set_value_with_kind(value, ValueKind::infer(value))
    }

    /// Replace the value with an explicit kind.
    pub fn set_value_with_kind(&mut self, value: &str, kind: ValueKind) -> Result<()> {
        check_ascii(value)?;
        let value = value.trim();
        match kind {
            ValueKind::Numeric if !is_numeric_token(value) => {
                return Err(FitsError::Validation(format!("{value:?} is not numeric")));
            }
            ValueKind::Logical if value != "T" && value != "F" => {
                return Err(FitsError::Validation(format!("{value:?} is not T or F")));
            }
            ValueKind::Text if value.len() > MAX_STRING_LEN => {
                return Err(FitsError::Validation(format!(
                    "string value {value:?} is longer than {MAX_STRING_LEN} characters"
                )));
            }
            _ => {}
        }
        self.value = value.to_string();
        self.kind = kind;
        Ok(())
    }

    /// Replace the comment. Value cards accept at most 48 characters,
    /// comment-format cards at most 80.
    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        check_ascii(comment)?;
        let limit = if self.is_comment {
            CARD_SIZE
        } else {
            MAX_VALUE_COMMENT_LEN
        };
        if comment.len() > limit {
            return Err(FitsError::Validation(format!(
                "comment longer than {limit} characters"
            )));
        }
        self.comment = comment.to_string();
        Ok(())
    }
}

impl fmt::Display for HeaderCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

fn valid_name_byte(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_')
}

fn check_ascii(s: &str) -> Result<()> {
    if s.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        Ok(())
    } else {
        Err(FitsError::Validation(format!(
            "{s:?} contains non-printable characters"
        )))
    }
}
