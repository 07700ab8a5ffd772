//! The ordered card container behind every HDU.
//!
//! A [`Header`] always ends in exactly one `END` card. Structural keywords
//! are maintained by the crate itself (see [`crate::precision::apply_precision`])
//! and refused by the public editing methods.

use tracing::{trace, warn};

use crate::block::{blank_card, padded_card_count};
use crate::card::HeaderCard;
use crate::error::{FitsError, Result};
use crate::precision::{apply_precision, DiskPrecision};
use crate::value::ValueKind;

/// Keywords that may not be edited, copied or removed through the public API.
///
/// [`Header::valid_key_edit`] matches these as substrings, so the prefixes
/// `TFORM`, `TTYPE`, `TZERO` and `TSCAL` also cover their numbered forms.
pub const RESERVED_KEYWORDS: [&str; 17] = [
    "SIMPLE", "EXTEND", "BITPIX", "NAXIS", "BZERO", "BSCALE", "END", "PCOUNT", "GCOUNT", "THEAP",
    "GROUPS", "XTENSION", "TFIELDS", "TFORM", "TTYPE", "TZERO", "TSCAL",
];

const COLUMN_PREFIXES: [&str; 4] = ["TFORM", "TTYPE", "TZERO", "TSCAL"];

/// Width of the text carried by one wrapped `COMMENT` card.
const COMMENT_TEXT_WIDTH: usize = 72;

/// Which kind of HDU a header currently describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Primary,
    Image,
    BinTable,
}

impl UnitKind {
    /// The `XTENSION` value for extension kinds.
    pub fn xtension(self) -> Option<&'static str> {
        match self {
            UnitKind::Primary => None,
            UnitKind::Image => Some("IMAGE"),
            UnitKind::BinTable => Some("BINTABLE"),
        }
    }
}

#[derive(Debug, Clone)]
struct BlockCache {
    unit: UnitKind,
    keys_only: bool,
    lines: Vec<String>,
}

/// An ordered sequence of header cards terminated by `END`.
///
/// The formatted block returned by [`Header::formatted_block`] is memoised
/// and dropped by every mutation. All mutation goes through `&mut self`, so a
/// header shared between threads can only be read.
#[derive(Debug, Clone)]
pub struct Header {
    cards: Vec<HeaderCard>,
    unit: UnitKind,
    warn_restricted: bool,
    cache: Option<BlockCache>,
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit && self.cards == other.cards
    }
}

/// Whether `name` is a structural keyword (exact match, with numbered forms).
pub fn is_structural(name: &str) -> bool {
    if RESERVED_KEYWORDS.contains(&name) {
        return true;
    }
    if let Some(n) = name.strip_prefix("NAXIS") {
        return !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit());
    }
    COLUMN_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Keywords that open every header in a fixed order, ahead of any user card.
fn is_mandatory(name: &str) -> bool {
    match name {
        "SIMPLE" | "XTENSION" | "BITPIX" | "NAXIS" | "PCOUNT" | "GCOUNT" => true,
        _ => name
            .strip_prefix("NAXIS")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

impl Header {
    fn from_cards(cards: Vec<HeaderCard>, unit: UnitKind) -> Self {
        Header {
            cards,
            unit,
            warn_restricted: true,
            cache: None,
        }
    }

    /// Build the minimal primary header.
    ///
    /// With a layout the header describes an image of that precision and
    /// shape; without one it has `NAXIS = 0`. `EXTEND = T` is added when
    /// `may_contain_extensions` is set.
    pub fn make_default(
        may_contain_extensions: bool,
        layout: Option<(DiskPrecision, &[usize])>,
    ) -> Self {
        let mut cards = vec![
            HeaderCard::raw("SIMPLE", "T", ValueKind::Logical, "conforms to FITS standard"),
            HeaderCard::end(),
        ];
        if may_contain_extensions {
            cards.insert(
                1,
                HeaderCard::raw("EXTEND", "T", ValueKind::Logical, "extensions may be present"),
            );
        }
        let mut header = Header::from_cards(cards, UnitKind::Primary);
        let (precision, axes) = match layout {
            Some((p, axes)) => (p, Some(axes)),
            None => (DiskPrecision::Byte, None),
        };
        apply_precision(&mut header, precision, axes);
        header
    }

    /// Build a header from raw card lines.
    ///
    /// When `populate_nonessential` is false only structural keywords,
    /// `EXTNAME` and `END` are kept. Malformed lines abort with
    /// [`FitsError::Format`] unless `skip_malformed` is set, in which case they
    /// are logged and dropped. Lines after `END` are ignored.
    pub fn parse<S: AsRef<str>>(
        lines: &[S],
        populate_nonessential: bool,
        skip_malformed: bool,
    ) -> Result<Self> {
        let mut cards = Vec::with_capacity(lines.len());
        let mut found_end = false;
        for line in lines {
            let card = match HeaderCard::parse(line.as_ref()) {
                Ok(card) => card,
                Err(e) if skip_malformed => {
                    warn!("skipping malformed header card: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            trace!(name = card.name(), value = card.value(), "header card");
            if card.is_end() {
                found_end = true;
                break;
            }
            if populate_nonessential || is_structural(card.name()) || card.name() == "EXTNAME" {
                cards.push(card);
            }
        }
        if !found_end {
            return Err(FitsError::MissingEnd);
        }
        cards.push(HeaderCard::end());

        let unit = match cards.first() {
            Some(c) if c.name() == "XTENSION" && c.value().eq_ignore_ascii_case("BINTABLE") => {
                UnitKind::BinTable
            }
            Some(c) if c.name() == "XTENSION" => UnitKind::Image,
            _ => UnitKind::Primary,
        };
        Ok(Header::from_cards(cards, unit))
    }

    /// Toggle the warning logged when an edit of a reserved keyword is refused.
    pub fn set_warn_on_restricted(&mut self, warn: bool) {
        self.warn_restricted = warn;
    }

    pub fn cards(&self) -> &[HeaderCard] {
        &self.cards
    }

    pub fn card(&self, index: usize) -> Option<&HeaderCard> {
        self.cards.get(index)
    }

    /// Number of cards, including `END`.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when the header holds nothing but `END`.
    pub fn is_empty(&self) -> bool {
        self.cards.len() <= 1
    }

    pub fn unit_kind(&self) -> UnitKind {
        self.unit
    }

    fn end_index(&self) -> usize {
        self.cards.len() - 1
    }

    /// Length of the leading run of mandatory cards.
    fn mandatory_len(&self) -> usize {
        self.cards.iter().take_while(|c| is_mandatory(c.name())).count()
    }

    /// Where a user card asked for at `index` may go: after the mandatory
    /// cards and before `END`.
    fn user_index(&self, index: Option<usize>) -> usize {
        let end = self.end_index();
        index.unwrap_or(end).clamp(self.mandatory_len().min(end), end)
    }

    /// Index of the first card named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = normalize(name);
        self.cards.iter().position(|c| c.name() == name)
    }

    /// Index of the first card named `name` whose value is `value`.
    pub fn index_of_value(&self, name: &str, value: &str) -> Option<usize> {
        let name = normalize(name);
        let value = value.trim();
        self.cards
            .iter()
            .position(|c| c.name() == name && c.value() == value)
    }

    /// Index of the first card that formats to `line`.
    ///
    /// Useful for telling apart duplicate `COMMENT` or `HISTORY` cards.
    pub fn index_of_line(&self, line: &str) -> Option<usize> {
        let line = line.trim_end();
        self.cards.iter().position(|c| c.format().trim_end() == line)
    }

    /// Value of the first card named `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.index_of(name).map(|i| self.cards[i].value())
    }

    /// Comment of the first card named `name`.
    pub fn comment(&self, name: &str) -> Option<&str> {
        self.index_of(name).map(|i| self.cards[i].comment())
    }

    fn first_number(&self, name: &str) -> Option<f64> {
        self.index_of(name).and_then(|i| self.cards[i].as_f64())
    }

    fn first_integer(&self, name: &str) -> Option<i64> {
        self.index_of(name).and_then(|i| self.cards[i].as_i64())
    }

    pub fn bitpix(&self) -> Option<i64> {
        self.first_integer("BITPIX")
    }

    pub fn naxis(&self) -> Option<usize> {
        self.first_integer("NAXIS").and_then(|n| usize::try_from(n).ok())
    }

    /// Axis lengths `NAXIS1..NAXISn`; missing axes read as 0.
    pub fn axes(&self) -> Vec<usize> {
        let n = self.naxis().unwrap_or(0);
        (1..=n)
            .map(|i| {
                self.first_integer(&format!("NAXIS{i}"))
                    .and_then(|v| usize::try_from(v).ok())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// `BSCALE`, defaulting to 1.
    pub fn bscale(&self) -> f64 {
        self.first_number("BSCALE").unwrap_or(1.0)
    }

    /// `BZERO`, defaulting to 0.
    pub fn bzero(&self) -> f64 {
        self.first_number("BZERO").unwrap_or(0.0)
    }

    pub fn extname(&self) -> Option<&str> {
        self.value("EXTNAME")
    }

    pub fn has_extend(&self) -> bool {
        self.index_of("EXTEND")
            .and_then(|i| self.cards[i].as_bool())
            .unwrap_or(false)
    }

    /// Returns false when `name` contains a reserved keyword anywhere in it.
    ///
    /// The match is by substring, so `MYBITPIX` is refused as well as
    /// `BITPIX`. A warning is logged when `warn` is set.
    pub fn valid_key_edit(name: &str, warn: bool) -> bool {
        let upper = normalize(name);
        match RESERVED_KEYWORDS.iter().find(|r| upper.contains(*r)) {
            Some(reserved) => {
                if warn {
                    warn!(keyword = %upper, reserved, "refusing to edit reserved keyword");
                }
                false
            }
            None => true,
        }
    }

    fn check_editable(&self, name: &str) -> Result<()> {
        if Header::valid_key_edit(name, self.warn_restricted) {
            Ok(())
        } else {
            Err(FitsError::RestrictedKey(normalize(name)))
        }
    }

    fn touch(&mut self) {
        self.cache = None;
    }

    /// Update the first card named `name`, or insert a new card.
    ///
    /// An existing card keeps its comment unless `comment` is given. A new
    /// card goes to `index` or just before `END`, clamped to lie after the
    /// mandatory keywords and before `END`.
    pub fn set_key(
        &mut self,
        name: &str,
        value: &str,
        comment: Option<&str>,
        index: Option<usize>,
    ) -> Result<()> {
        self.check_editable(name)?;
        match self.index_of(name) {
            Some(i) => {
                let mut card = self.cards[i].clone();
                card.set_value(value)?;
                if let Some(comment) = comment {
                    card.set_comment(comment)?;
                }
                self.cards[i] = card;
                self.touch();
                Ok(())
            }
            None => {
                let card = HeaderCard::new(name, value, comment.unwrap_or(""))?;
                self.insert_card(Some(self.user_index(index)), card);
                Ok(())
            }
        }
    }

    /// Replace the first card with the same name as `card`, or insert it.
    pub fn set_card(&mut self, card: HeaderCard, index: Option<usize>) -> Result<()> {
        self.check_editable(card.name())?;
        if card.is_comment() {
            self.insert_card(Some(self.user_index(index)), card);
            return Ok(());
        }
        match self.index_of(card.name()) {
            Some(i) => {
                self.cards[i] = card;
                self.touch();
            }
            None => {
                self.insert_card(Some(self.user_index(index)), card);
            }
        }
        Ok(())
    }

    /// Insert a new value card even if the name already exists.
    ///
    /// A comment longer than a value card can hold continues in `COMMENT`
    /// cards directly after it.
    pub fn add_key(
        &mut self,
        name: &str,
        value: &str,
        comment: &str,
        index: Option<usize>,
    ) -> Result<()> {
        self.check_editable(name)?;
        let split = comment
            .char_indices()
            .nth(crate::card::MAX_VALUE_COMMENT_LEN)
            .map(|(i, _)| i)
            .unwrap_or(comment.len());
        let (head, tail) = comment.split_at(split);
        let card = HeaderCard::new(name, value, head)?;
        let continuation = comment_cards(tail)?;
        let at = self.insert_card(Some(self.user_index(index)), card);
        for (offset, c) in continuation.into_iter().enumerate() {
            self.cards.insert(at + 1 + offset, c);
        }
        Ok(())
    }

    /// Insert free text as one or more `COMMENT` cards.
    pub fn add_comment_line(&mut self, text: &str, index: Option<usize>) -> Result<()> {
        let cards = comment_cards(text)?;
        let mut at = self.user_index(index);
        for card in cards {
            self.cards.insert(at, card);
            at += 1;
        }
        self.touch();
        Ok(())
    }

    /// Move the card at `from` to `to`, keeping every other card in order.
    /// A target among the mandatory keywords lands just after them.
    pub fn move_key(&mut self, from: usize, to: usize) -> Result<()> {
        let end = self.end_index();
        if from >= end || to >= end {
            return Err(FitsError::InvalidRange(format!(
                "cannot move card {from} to {to} in a header of {end} cards"
            )));
        }
        self.check_editable(self.cards[from].name())?;
        let card = self.cards.remove(from);
        let to = to.max(self.mandatory_len());
        self.cards.insert(to, card);
        self.touch();
        Ok(())
    }

    /// Remove and return the card at `index`.
    pub fn remove_key_at(&mut self, index: usize) -> Result<HeaderCard> {
        if index >= self.end_index() {
            let name = self.cards.get(index).map(|c| c.name()).unwrap_or("");
            return if name == "END" {
                Err(FitsError::RestrictedKey(name.to_string()))
            } else {
                Err(FitsError::InvalidRange(format!("no card at index {index}")))
            };
        }
        self.check_editable(self.cards[index].name())?;
        self.touch();
        Ok(self.cards.remove(index))
    }

    /// Remove the first card named `name`, if any.
    pub fn remove_key(&mut self, name: &str) -> Result<Option<HeaderCard>> {
        self.check_editable(name)?;
        match self.index_of(name) {
            Some(i) => {
                self.touch();
                Ok(Some(self.cards.remove(i)))
            }
            None => Ok(None),
        }
    }

    /// Remove the first card of each name. Nothing is removed if any name is
    /// reserved. Returns how many cards were removed.
    pub fn remove_keys(&mut self, names: &[&str]) -> Result<usize> {
        for name in names {
            self.check_editable(name)?;
        }
        let mut removed = 0;
        for name in names {
            if let Some(i) = self.index_of(name) {
                self.cards.remove(i);
                removed += 1;
            }
        }
        if removed > 0 {
            self.touch();
        }
        Ok(removed)
    }

    /// Append every non-reserved card of `source` before `END`.
    /// Returns the number of cards copied.
    pub fn copy_header_from(&mut self, source: &Header) -> usize {
        let mut at = self.end_index();
        let mut copied = 0;
        for card in &source.cards {
            if card.is_end() || !Header::valid_key_edit(card.name(), false) {
                continue;
            }
            self.cards.insert(at, card.clone());
            at += 1;
            copied += 1;
        }
        if copied > 0 {
            self.touch();
        }
        copied
    }

    /// Reset to the minimal header for `layout`, keeping the unit kind and
    /// whether `EXTEND` was set.
    pub fn remove_all_keys(&mut self, layout: Option<(DiskPrecision, &[usize])>) {
        let unit = self.unit;
        let warn = self.warn_restricted;
        *self = Header::make_default(self.has_extend(), layout);
        self.warn_restricted = warn;
        self.convert_to(unit);
    }

    /// The header formatted as 80-character lines for `unit`.
    ///
    /// Card 0 and the unit-specific keywords are converted first. With
    /// `keys_only` the existing cards are returned; otherwise the block is
    /// padded with blank cards to a multiple of 36.
    pub fn formatted_block(&mut self, unit: UnitKind, keys_only: bool) -> &[String] {
        self.convert_to(unit);
        let fresh = matches!(&self.cache, Some(c) if c.unit == unit && c.keys_only == keys_only);
        if !fresh {
            self.cache = None;
        }
        let cache = self.cache.get_or_insert_with(|| {
            let mut lines: Vec<String> = self.cards.iter().map(HeaderCard::format).collect();
            if !keys_only {
                lines.resize_with(padded_card_count(lines.len()), blank_card);
            }
            BlockCache {
                unit,
                keys_only,
                lines,
            }
        });
        &cache.lines
    }

    /// The padded header block as bytes, ready to write.
    pub fn to_bytes(&mut self, unit: UnitKind) -> Vec<u8> {
        self.formatted_block(unit, false).concat().into_bytes()
    }

    fn convert_to(&mut self, unit: UnitKind) {
        let first = match unit.xtension() {
            None => HeaderCard::raw("SIMPLE", "T", ValueKind::Logical, "conforms to FITS standard"),
            Some(x) => HeaderCard::raw("XTENSION", x, ValueKind::Text, "extension type"),
        };
        let opens = |c: &HeaderCard| c.name() == "SIMPLE" || c.name() == "XTENSION";
        let in_place = matches!(
            self.cards.first(),
            Some(c) if c.name() == first.name() && c.value() == first.value()
        );
        let mut changed = false;
        if !in_place || self.cards.iter().filter(|c| opens(c)).count() != 1 {
            self.cards.retain(|c| !opens(c));
            self.cards.insert(0, first);
            changed = true;
        }

        match unit {
            UnitKind::Primary => {
                let before = self.cards.len();
                self.cards.retain(|c| c.name() != "PCOUNT" && c.name() != "GCOUNT");
                changed |= before != self.cards.len();
            }
            UnitKind::Image | UnitKind::BinTable => {
                if let Some(i) = self.index_of("EXTEND") {
                    self.cards.remove(i);
                    changed = true;
                }
                if self.index_of("PCOUNT").is_none() || self.index_of("GCOUNT").is_none() {
                    let mut at = self.last_axis_index().map_or(self.end_index(), |i| i + 1);
                    if self.index_of("PCOUNT").is_none() {
                        self.cards.insert(
                            at,
                            HeaderCard::raw("PCOUNT", "0", ValueKind::Numeric, "number of parameters"),
                        );
                        at += 1;
                    } else if let Some(i) = self.index_of("PCOUNT") {
                        at = i + 1;
                    }
                    if self.index_of("GCOUNT").is_none() {
                        self.cards.insert(
                            at,
                            HeaderCard::raw("GCOUNT", "1", ValueKind::Numeric, "number of groups"),
                        );
                    }
                    changed = true;
                }
            }
        }

        if changed || self.unit != unit {
            self.unit = unit;
            self.touch();
        }
    }

    /// Index of the last `NAXISn` card, or of `NAXIS` when there are none.
    fn last_axis_index(&self) -> Option<usize> {
        self.cards
            .iter()
            .rposition(|c| c.name().starts_with("NAXIS") && is_structural(c.name()))
    }

    /// Insert `card` at `index` (clamped before `END`) and return where it went.
    pub(crate) fn insert_card(&mut self, index: Option<usize>, card: HeaderCard) -> usize {
        let at = index.unwrap_or(self.end_index()).min(self.end_index());
        self.cards.insert(at, card);
        self.touch();
        at
    }

    /// Replace the first card of the same name, or insert at `index`.
    /// Returns the card's final position.
    pub(crate) fn upsert(&mut self, card: HeaderCard, index: usize) -> usize {
        match self.index_of(card.name()) {
            Some(i) => {
                if self.cards[i] != card {
                    self.cards[i] = card;
                    self.touch();
                }
                i
            }
            None => self.insert_card(Some(index), card),
        }
    }

    /// Drop every card (other than `END`) for which `keep` returns false.
    pub(crate) fn retain_cards(&mut self, mut keep: impl FnMut(&HeaderCard) -> bool) {
        let before = self.cards.len();
        self.cards.retain(|c| c.is_end() || keep(c));
        if before != self.cards.len() {
            self.touch();
        }
    }

    /// Set a structural keyword that the public setters refuse.
    pub(crate) fn set_structural(&mut self, name: &str, value: &str, kind: ValueKind, comment: &str) {
        let card = HeaderCard::raw(name, value, kind, comment);
        let end = self.end_index();
        self.upsert(card, end);
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::make_default(false, None)
    }
}

fn comment_cards(text: &str) -> Result<Vec<HeaderCard>> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(COMMENT_TEXT_WIDTH)
        .map(|chunk| {
            let chunk: String = chunk.iter().collect();
            HeaderCard::comment_line(&format!("COMMENT {chunk}"))
        })
        .collect()
}
