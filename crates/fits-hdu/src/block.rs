//! Block geometry shared by headers and data units.
//!
//! Every HDU occupies whole 2880-byte blocks. A header block holds 36 cards
//! and is filled out with blank cards; a data unit is filled out with zeros.

pub const BLOCK_SIZE: usize = 2880;

/// Width of one header card.
pub const CARD_SIZE: usize = 80;

pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Fill byte for the tail of a header block.
pub const HEADER_PAD_BYTE: u8 = b' ';

/// Fill byte for the tail of a data unit.
pub const DATA_PAD_BYTE: u8 = 0;

/// `len` rounded up to a whole number of blocks; zero stays zero.
pub const fn padded_byte_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// [`padded_byte_len`] for stream offsets.
pub const fn padded_offset(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Cards taken up by a header of `cards` cards, blank filler included.
pub const fn padded_card_count(cards: usize) -> usize {
    cards.div_ceil(CARDS_PER_BLOCK) * CARDS_PER_BLOCK
}

/// Zero-fill `buf` up to the next block boundary.
pub fn pad_data_unit(buf: &mut Vec<u8>) {
    buf.resize(padded_byte_len(buf.len()), DATA_PAD_BYTE);
}

/// The filler card for the last header block.
pub fn blank_card() -> String {
    char::from(HEADER_PAD_BYTE).to_string().repeat(CARD_SIZE)
}
