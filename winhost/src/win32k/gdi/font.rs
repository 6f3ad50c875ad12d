//! Text Rendering
//!
//! An embedded 8x8 fixed-pitch bitmap font covering printable ASCII.
//! Each glyph is eight row bytes, most significant bit leftmost. Text is
//! drawn by writing a scaled block per set bit; kerning is fixed-pitch.

use super::dc::{current_font, dc_of};
use super::TRANSPARENT;
use crate::abi::{Bool, Dword, FALSE, TRUE};
use crate::win32k::{Hdc, Rect};
use std::os::raw::c_char;

/// Glyph cell edge in pixels before scaling.
pub const GLYPH_SIZE: i32 = 8;

/// `DrawTextA` flag: measure, do not draw.
pub const DT_CALCRECT: Dword = 0x0000_0400;

/// Printable-ASCII glyph rows, 0x20..=0x7F.
#[rustfmt::skip]
const FONT_8X8: [[u8; 8]; 96] = [
    [0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00], // ' '
    [0x18,0x18,0x18,0x18,0x18,0x00,0x18,0x00], // '!'
    [0x6C,0x6C,0x48,0x00,0x00,0x00,0x00,0x00], // '"'
    [0x6C,0x6C,0xFE,0x6C,0xFE,0x6C,0x6C,0x00], // '#'
    [0x18,0x3E,0x60,0x3C,0x06,0x7C,0x18,0x00], // '$'
    [0x00,0xC6,0xCC,0x18,0x30,0x66,0xC6,0x00], // '%'
    [0x38,0x6C,0x38,0x76,0xDC,0xCC,0x76,0x00], // '&'
    [0x18,0x18,0x30,0x00,0x00,0x00,0x00,0x00], // '\''
    [0x0C,0x18,0x30,0x30,0x30,0x18,0x0C,0x00], // '('
    [0x30,0x18,0x0C,0x0C,0x0C,0x18,0x30,0x00], // ')'
    [0x00,0x66,0x3C,0xFF,0x3C,0x66,0x00,0x00], // '*'
    [0x00,0x18,0x18,0x7E,0x18,0x18,0x00,0x00], // '+'
    [0x00,0x00,0x00,0x00,0x00,0x18,0x18,0x30], // ','
    [0x00,0x00,0x00,0x7E,0x00,0x00,0x00,0x00], // '-'
    [0x00,0x00,0x00,0x00,0x00,0x18,0x18,0x00], // '.'
    [0x06,0x0C,0x18,0x30,0x60,0xC0,0x80,0x00], // '/'
    [0x7C,0xC6,0xCE,0xDE,0xF6,0xE6,0x7C,0x00], // '0'
    [0x18,0x38,0x18,0x18,0x18,0x18,0x7E,0x00], // '1'
    [0x3C,0x66,0x06,0x0C,0x30,0x60,0x7E,0x00], // '2'
    [0x3C,0x66,0x06,0x1C,0x06,0x66,0x3C,0x00], // '3'
    [0x0C,0x1C,0x3C,0x6C,0x7E,0x0C,0x0C,0x00], // '4'
    [0x7E,0x60,0x7C,0x06,0x06,0x66,0x3C,0x00], // '5'
    [0x1C,0x30,0x60,0x7C,0x66,0x66,0x3C,0x00], // '6'
    [0x7E,0x06,0x0C,0x18,0x30,0x30,0x30,0x00], // '7'
    [0x3C,0x66,0x66,0x3C,0x66,0x66,0x3C,0x00], // '8'
    [0x3C,0x66,0x66,0x3E,0x06,0x0C,0x38,0x00], // '9'
    [0x00,0x18,0x18,0x00,0x00,0x18,0x18,0x00], // ':'
    [0x00,0x18,0x18,0x00,0x00,0x18,0x18,0x30], // ';'
    [0x0C,0x18,0x30,0x60,0x30,0x18,0x0C,0x00], // '<'
    [0x00,0x00,0x7E,0x00,0x7E,0x00,0x00,0x00], // '='
    [0x30,0x18,0x0C,0x06,0x0C,0x18,0x30,0x00], // '>'
    [0x3C,0x66,0x06,0x0C,0x18,0x00,0x18,0x00], // '?'
    [0x7C,0xC6,0xDE,0xDE,0xDE,0xC0,0x78,0x00], // '@'
    [0x18,0x3C,0x66,0x66,0x7E,0x66,0x66,0x00], // 'A'
    [0x7C,0x66,0x66,0x7C,0x66,0x66,0x7C,0x00], // 'B'
    [0x3C,0x66,0x60,0x60,0x60,0x66,0x3C,0x00], // 'C'
    [0x78,0x6C,0x66,0x66,0x66,0x6C,0x78,0x00], // 'D'
    [0x7E,0x60,0x60,0x7C,0x60,0x60,0x7E,0x00], // 'E'
    [0x7E,0x60,0x60,0x7C,0x60,0x60,0x60,0x00], // 'F'
    [0x3C,0x66,0x60,0x6E,0x66,0x66,0x3E,0x00], // 'G'
    [0x66,0x66,0x66,0x7E,0x66,0x66,0x66,0x00], // 'H'
    [0x7E,0x18,0x18,0x18,0x18,0x18,0x7E,0x00], // 'I'
    [0x06,0x06,0x06,0x06,0x66,0x66,0x3C,0x00], // 'J'
    [0x66,0x6C,0x78,0x70,0x78,0x6C,0x66,0x00], // 'K'
    [0x60,0x60,0x60,0x60,0x60,0x60,0x7E,0x00], // 'L'
    [0xC6,0xEE,0xFE,0xD6,0xC6,0xC6,0xC6,0x00], // 'M'
    [0x66,0x76,0x7E,0x7E,0x6E,0x66,0x66,0x00], // 'N'
    [0x3C,0x66,0x66,0x66,0x66,0x66,0x3C,0x00], // 'O'
    [0x7C,0x66,0x66,0x7C,0x60,0x60,0x60,0x00], // 'P'
    [0x3C,0x66,0x66,0x66,0x66,0x6C,0x36,0x00], // 'Q'
    [0x7C,0x66,0x66,0x7C,0x6C,0x66,0x66,0x00], // 'R'
    [0x3C,0x66,0x60,0x3C,0x06,0x66,0x3C,0x00], // 'S'
    [0x7E,0x18,0x18,0x18,0x18,0x18,0x18,0x00], // 'T'
    [0x66,0x66,0x66,0x66,0x66,0x66,0x3C,0x00], // 'U'
    [0x66,0x66,0x66,0x66,0x66,0x3C,0x18,0x00], // 'V'
    [0xC6,0xC6,0xC6,0xD6,0xFE,0xEE,0xC6,0x00], // 'W'
    [0x66,0x66,0x3C,0x18,0x3C,0x66,0x66,0x00], // 'X'
    [0x66,0x66,0x66,0x3C,0x18,0x18,0x18,0x00], // 'Y'
    [0x7E,0x06,0x0C,0x18,0x30,0x60,0x7E,0x00], // 'Z'
    [0x3C,0x30,0x30,0x30,0x30,0x30,0x3C,0x00], // '['
    [0xC0,0x60,0x30,0x18,0x0C,0x06,0x02,0x00], // '\\'
    [0x3C,0x0C,0x0C,0x0C,0x0C,0x0C,0x3C,0x00], // ']'
    [0x10,0x38,0x6C,0xC6,0x00,0x00,0x00,0x00], // '^'
    [0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xFF], // '_'
    [0x30,0x18,0x0C,0x00,0x00,0x00,0x00,0x00], // '`'
    [0x00,0x00,0x3C,0x06,0x3E,0x66,0x3E,0x00], // 'a'
    [0x60,0x60,0x7C,0x66,0x66,0x66,0x7C,0x00], // 'b'
    [0x00,0x00,0x3C,0x66,0x60,0x66,0x3C,0x00], // 'c'
    [0x06,0x06,0x3E,0x66,0x66,0x66,0x3E,0x00], // 'd'
    [0x00,0x00,0x3C,0x66,0x7E,0x60,0x3C,0x00], // 'e'
    [0x1C,0x30,0x7C,0x30,0x30,0x30,0x30,0x00], // 'f'
    [0x00,0x00,0x3E,0x66,0x66,0x3E,0x06,0x7C], // 'g'
    [0x60,0x60,0x7C,0x66,0x66,0x66,0x66,0x00], // 'h'
    [0x18,0x00,0x38,0x18,0x18,0x18,0x3C,0x00], // 'i'
    [0x0C,0x00,0x1C,0x0C,0x0C,0x0C,0x6C,0x38], // 'j'
    [0x60,0x60,0x66,0x6C,0x78,0x6C,0x66,0x00], // 'k'
    [0x38,0x18,0x18,0x18,0x18,0x18,0x3C,0x00], // 'l'
    [0x00,0x00,0xEC,0xFE,0xD6,0xC6,0xC6,0x00], // 'm'
    [0x00,0x00,0x7C,0x66,0x66,0x66,0x66,0x00], // 'n'
    [0x00,0x00,0x3C,0x66,0x66,0x66,0x3C,0x00], // 'o'
    [0x00,0x00,0x7C,0x66,0x66,0x7C,0x60,0x60], // 'p'
    [0x00,0x00,0x3E,0x66,0x66,0x3E,0x06,0x06], // 'q'
    [0x00,0x00,0x6E,0x70,0x60,0x60,0x60,0x00], // 'r'
    [0x00,0x00,0x3E,0x60,0x3C,0x06,0x7C,0x00], // 's'
    [0x30,0x30,0x7C,0x30,0x30,0x30,0x1C,0x00], // 't'
    [0x00,0x00,0x66,0x66,0x66,0x66,0x3E,0x00], // 'u'
    [0x00,0x00,0x66,0x66,0x66,0x3C,0x18,0x00], // 'v'
    [0x00,0x00,0xC6,0xC6,0xD6,0xFE,0x6C,0x00], // 'w'
    [0x00,0x00,0x66,0x3C,0x18,0x3C,0x66,0x00], // 'x'
    [0x00,0x00,0x66,0x66,0x66,0x3E,0x06,0x7C], // 'y'
    [0x00,0x00,0x7E,0x0C,0x18,0x30,0x7E,0x00], // 'z'
    [0x0E,0x18,0x18,0x70,0x18,0x18,0x0E,0x00], // '{'
    [0x18,0x18,0x18,0x18,0x18,0x18,0x18,0x00], // '|'
    [0x70,0x18,0x18,0x0E,0x18,0x18,0x70,0x00], // '}'
    [0x76,0xDC,0x00,0x00,0x00,0x00,0x00,0x00], // '~'
    [0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00], // DEL
];

/// Glyph rows for a byte; non-printable bytes render as space.
pub fn glyph(byte: u8) -> &'static [u8; 8] {
    let index = byte.wrapping_sub(0x20);
    if index < 96 {
        &FONT_8X8[index as usize]
    } else {
        &FONT_8X8[0]
    }
}

/// TEXTMETRICA layout.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct TextMetricA {
    pub tmHeight: i32,
    pub tmAscent: i32,
    pub tmDescent: i32,
    pub tmInternalLeading: i32,
    pub tmExternalLeading: i32,
    pub tmAveCharWidth: i32,
    pub tmMaxCharWidth: i32,
    pub tmWeight: i32,
    pub tmOverhang: i32,
    pub tmDigitizedAspectX: i32,
    pub tmDigitizedAspectY: i32,
    pub tmFirstChar: u8,
    pub tmLastChar: u8,
    pub tmDefaultChar: u8,
    pub tmBreakChar: u8,
    pub tmItalic: u8,
    pub tmUnderlined: u8,
    pub tmStruckOut: u8,
    pub tmPitchAndFamily: u8,
    pub tmCharSet: u8,
}

unsafe fn text_arg<'a>(text: *const c_char, length: i32) -> Option<&'a [u8]> {
    if text.is_null() {
        return None;
    }
    let length = if length < 0 {
        let mut n = 0;
        while *text.add(n) != 0 {
            n += 1;
        }
        n
    } else {
        length as usize
    };
    Some(std::slice::from_raw_parts(text as *const u8, length))
}

/// TextOutA - draw fixed-pitch text at (x, y).
///
/// Opaque background mode fills each cell with the DC background color
/// first; transparent mode writes only the set bits.
pub unsafe extern "win64" fn TextOutA(
    hdc: Hdc,
    x: i32,
    y: i32,
    text: *const c_char,
    length: i32,
) -> Bool {
    let bytes = match text_arg(text, length) {
        Some(b) => b,
        None => return FALSE,
    };
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return FALSE,
    };
    let dc = dc.lock().unwrap();
    let scale = current_font(&dc).scale.max(1);
    let mut surface = dc.target.lock().unwrap();

    let mut cell_x = x;
    for &byte in bytes {
        if dc.bk_mode != TRANSPARENT {
            surface.fill(
                &Rect::new(
                    cell_x,
                    y,
                    cell_x + GLYPH_SIZE * scale,
                    y + GLYPH_SIZE * scale,
                ),
                dc.bk_color,
            );
        }
        let rows = glyph(byte);
        for (row, &bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (0x80 >> col) != 0 {
                    surface.fill(
                        &Rect::new(
                            cell_x + col * scale,
                            y + row as i32 * scale,
                            cell_x + (col + 1) * scale,
                            y + (row as i32 + 1) * scale,
                        ),
                        dc.text_color,
                    );
                }
            }
        }
        cell_x += GLYPH_SIZE * scale;
    }
    TRUE
}

/// DrawTextA - single-line fixed-pitch layout inside `rect`. With
/// `DT_CALCRECT` the tight bounding box is written back and no pixel is
/// touched.
pub unsafe extern "win64" fn DrawTextA(
    hdc: Hdc,
    text: *const c_char,
    length: i32,
    rect: *mut Rect,
    format: Dword,
) -> i32 {
    if rect.is_null() {
        return 0;
    }
    let bytes = match text_arg(text, length) {
        Some(b) => b,
        None => return 0,
    };
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return 0,
    };
    let scale = current_font(&dc.lock().unwrap()).scale.max(1);
    let width = bytes.len() as i32 * GLYPH_SIZE * scale;
    let height = GLYPH_SIZE * scale;
    let r = &mut *rect;
    if format & DT_CALCRECT != 0 {
        r.right = r.left + width;
        r.bottom = r.top + height;
        return height;
    }
    let (x, y) = (r.left, r.top);
    drop(dc);
    if TextOutA(hdc, x, y, text, bytes.len() as i32) == FALSE {
        return 0;
    }
    height
}

/// GetTextMetricsA - the fixed 8-pixel ascent/advance, scaled.
pub unsafe extern "win64" fn GetTextMetricsA(hdc: Hdc, out: *mut TextMetricA) -> Bool {
    if out.is_null() {
        return FALSE;
    }
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return FALSE,
    };
    let scale = current_font(&dc.lock().unwrap()).scale.max(1);
    let edge = GLYPH_SIZE * scale;
    *out = TextMetricA {
        tmHeight: edge,
        tmAscent: edge,
        tmDescent: 0,
        tmAveCharWidth: edge,
        tmMaxCharWidth: edge,
        tmWeight: 400,
        tmFirstChar: 0x20,
        tmLastChar: 0x7F,
        tmDefaultChar: b' ',
        tmBreakChar: b' ',
        tmPitchAndFamily: 1, // fixed pitch
        ..Default::default()
    };
    TRUE
}
