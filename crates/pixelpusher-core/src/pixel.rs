//! The elementary pixel color record

/// One RGB pixel.
///
/// PixelPusher hardware also supports an RGBOW (red, green, blue, orange,
/// white) strip mode; this library only implements the 3-channel kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Pixel {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn set(&mut self, red: u8, green: u8, blue: u8) {
        self.red = red;
        self.green = green;
        self.blue = blue;
    }
}

impl From<(u8, u8, u8)> for Pixel {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        Self { red, green, blue }
    }
}
