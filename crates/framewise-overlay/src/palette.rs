use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    pub const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);
    pub const WHITE: Color = Color::rgb(0xFF, 0xFF, 0xFF);
    pub const MAGENTA: Color = Color::rgb(0xFF, 0x00, 0xFF);
    pub const LIGHT_GRAY: Color = Color::rgb(0xCC, 0xCC, 0xCC);
    pub const RED: Color = Color::rgb(0xFF, 0x00, 0x00);
    pub const BLUE: Color = Color::rgb(0x00, 0x00, 0xFF);
    pub const DARK_GRAY: Color = Color::rgb(0x44, 0x44, 0x44);
    pub const CYAN: Color = Color::rgb(0x00, 0xFF, 0xFF);
    pub const YELLOW: Color = Color::rgb(0xFF, 0xFF, 0x00);
    pub const GREEN: Color = Color::rgb(0x00, 0xFF, 0x00);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    pub stroke: Color,
    pub fill: Color,
    pub text: Color,
}

impl PaletteEntry {
    /// Box outline and label background share one color; text contrasts with it.
    const fn pair(text: Color, body: Color) -> Self {
        Self { stroke: body, fill: body, text }
    }
}

pub const PALETTE_SIZE: usize = 10;

/// Entry 0 is used for detections without a track id.
pub static PALETTE: [PaletteEntry; PALETTE_SIZE] = [
    PaletteEntry::pair(Color::BLACK, Color::WHITE),
    PaletteEntry::pair(Color::WHITE, Color::MAGENTA),
    PaletteEntry::pair(Color::BLACK, Color::LIGHT_GRAY),
    PaletteEntry::pair(Color::WHITE, Color::RED),
    PaletteEntry::pair(Color::WHITE, Color::BLUE),
    PaletteEntry::pair(Color::WHITE, Color::DARK_GRAY),
    PaletteEntry::pair(Color::BLACK, Color::CYAN),
    PaletteEntry::pair(Color::BLACK, Color::YELLOW),
    PaletteEntry::pair(Color::WHITE, Color::BLACK),
    PaletteEntry::pair(Color::BLACK, Color::GREEN),
];

/// Same id, same color, for as long as the process lives. Distinct ids may
/// share an entry.
pub fn color_index_for(tracking_id: Option<i32>) -> usize {
    match tracking_id {
        None => 0,
        // unsigned_abs keeps i32::MIN in range
        Some(v) => (v.unsigned_abs() % PALETTE_SIZE as u32) as usize,
    }
}

pub fn entry_for(tracking_id: Option<i32>) -> &'static PaletteEntry {
    &PALETTE[color_index_for(tracking_id)]
}
