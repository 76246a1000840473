//! Per-strip pixel buffer
//!
//! A [`Strip`] holds the pixel state for one physical output of a device.
//! The rendering side writes colors into it from wherever it likes; the
//! device's send loop serializes touched strips into outbound packets. Both
//! sides go through the interior lock, so a strip can be shared freely.

use bytes::Bytes;
use parking_lot::Mutex;
use pixelpusher_core::Pixel;

use crate::error::{DiscoveryError, Result};

/// One independently addressable output of a device.
///
/// The length is fixed at creation from the device's announced
/// pixels-per-strip and never changes. RGBOW strips are not supported;
/// serialization is always three bytes per pixel.
#[derive(Debug)]
pub struct Strip {
    number: u16,
    state: Mutex<StripState>,
}

#[derive(Debug)]
struct StripState {
    pixels: Vec<Pixel>,
    touched: bool,
    power_scale: f64,
    data: Vec<u8>,
}

impl Strip {
    pub fn new(number: u16, length: usize) -> Self {
        Self {
            number,
            state: Mutex::new(StripState {
                pixels: vec![Pixel::default(); length],
                touched: false,
                power_scale: 1.0,
                data: vec![0u8; 3 * length],
            }),
        }
    }

    /// Strip index within its device, as carried in pixel packets.
    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn len(&self) -> usize {
        self.state.lock().pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when pixel data changed since the last serialization.
    pub fn is_touched(&self) -> bool {
        self.state.lock().touched
    }

    /// Set every pixel to one color.
    pub fn set_all(&self, red: u8, green: u8, blue: u8) {
        let mut state = self.state.lock();
        for pixel in &mut state.pixels {
            pixel.set(red, green, blue);
        }
        state.touched = true;
    }

    /// Replace the whole pixel buffer.
    ///
    /// The replacement must have exactly the strip's fixed length.
    pub fn set_pixels(&self, pixels: &[Pixel]) -> Result<()> {
        let mut state = self.state.lock();
        if pixels.len() != state.pixels.len() {
            return Err(DiscoveryError::BufferLengthMismatch {
                expected: state.pixels.len(),
                actual: pixels.len(),
            });
        }
        state.pixels.copy_from_slice(pixels);
        state.touched = true;
        Ok(())
    }

    /// Set one pixel.
    pub fn set_pixel(&self, index: usize, red: u8, green: u8, blue: u8) -> Result<()> {
        let mut state = self.state.lock();
        let len = state.pixels.len();
        let pixel = state
            .pixels
            .get_mut(index)
            .ok_or(DiscoveryError::IndexOutOfRange { index, len })?;
        pixel.set(red, green, blue);
        state.touched = true;
        Ok(())
    }

    /// Snapshot of the current pixel values.
    pub fn pixels(&self) -> Vec<Pixel> {
        self.state.lock().pixels.clone()
    }

    pub fn power_scale(&self) -> f64 {
        self.state.lock().power_scale
    }

    /// Scale factor applied to every channel at serialization time.
    pub fn set_power_scale(&self, power_scale: f64) {
        self.state.lock().power_scale = power_scale;
    }

    /// Flatten the strip to transmit-ready bytes (3 per pixel, RGB order,
    /// channels scaled by the power factor and truncated to 8 bits).
    ///
    /// Clears the touched flag, so the send loop must call this exactly once
    /// per transmission cycle per strip it sends.
    pub fn serialize(&self) -> Bytes {
        let mut state = self.state.lock();
        let scale = state.power_scale;
        for i in 0..state.pixels.len() {
            let pixel = state.pixels[i];
            state.data[3 * i] = (pixel.red as f64 * scale) as u8;
            state.data[3 * i + 1] = (pixel.green as f64 * scale) as u8;
            state.data[3 * i + 2] = (pixel.blue as f64 * scale) as u8;
        }
        state.touched = false;
        Bytes::copy_from_slice(&state.data)
    }
}
