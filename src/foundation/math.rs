use image::RgbImage;

use crate::foundation::core::PixelRect;

/// Rec. 601 luma weights, the same conversion PIL's `"L"` mode applies.
pub const LUMA_R: f64 = 0.299;
pub const LUMA_G: f64 = 0.587;
pub const LUMA_B: f64 = 0.114;

#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f64 {
    LUMA_R * f64::from(r) + LUMA_G * f64::from(g) + LUMA_B * f64::from(b)
}

/// Mean luma over the whole image, `None` when the image has no pixels.
pub fn mean_luma(img: &RgbImage) -> Option<f64> {
    let (w, h) = img.dimensions();
    mean_luma_in(
        img,
        PixelRect {
            x: 0,
            y: 0,
            width: w,
            height: h,
        },
    )
}

/// Mean luma over `rect`, which must lie inside `img`.
pub fn mean_luma_in(img: &RgbImage, rect: PixelRect) -> Option<f64> {
    if rect.area() == 0 {
        return None;
    }
    let mut sum = 0.0f64;
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let p = img.get_pixel(x, y).0;
            sum += luma(p[0], p[1], p[2]);
        }
    }
    Some(clamp_brightness(sum / rect.area() as f64))
}

/// Keep a brightness value inside `[0, 255]` (guards against float drift at the extremes).
pub fn clamp_brightness(v: f64) -> f64 {
    v.clamp(0.0, 255.0)
}

/// Flat gray value used for a brightness target.
pub fn gray_level(brightness: f64) -> u8 {
    clamp_brightness(brightness).round() as u8
}
