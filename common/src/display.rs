//! Text rendering for the single 8x8 LED matrix.

use font8x8::{UnicodeFonts, BASIC_FONTS};

pub const MATRIX_ROWS: usize = 8;

/// Row bitmaps for the first visible character of `text`, leftmost pixel in
/// the most significant bit. Empty text and glyphs outside the basic font
/// render blank.
pub fn matrix_rows(text: &str) -> [u8; MATRIX_ROWS] {
    let Some(glyph) = text.chars().next().and_then(|ch| BASIC_FONTS.get(ch)) else {
        return [0; MATRIX_ROWS];
    };
    glyph.map(u8::reverse_bits)
}
