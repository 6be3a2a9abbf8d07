//! Deterministic synthetic frames
//!
//! A checkerboard is sharp, mid-bright and high-contrast, so most
//! algorithms report it as normal. A solid black frame trips signal loss,
//! a solid blue frame trips blue screen.

use image::{Rgb, RgbImage};

pub fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

pub fn checkerboard_frame(width: u32, height: u32, cell: u32) -> RgbImage {
    let cell = cell.max(1);
    RgbImage::from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgb([40, 40, 40])
        } else {
            Rgb([215, 215, 215])
        }
    })
}

/// Horizontal luminance ramp
pub fn gradient_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        let v = (u64::from(x) * 255 / u64::from(width.max(2) - 1)) as u8;
        Rgb([v, v, v])
    })
}

/// Reproducible salt noise around mid grey
pub fn noisy_frame(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut state = seed.max(1);
    RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let v = (state % 256) as u8;
        Rgb([v, v, v])
    })
}
