use image::{Rgba, RgbaImage};

/// Pixel-level difference between two same-sized images.
pub struct PixelDiff {
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub image: RgbaImage,
}

/// Compare two images pixel by pixel. A pixel counts as different when any
/// color channel deviates by more than `sensitivity`; alpha is ignored.
/// The returned image shows differing pixels amplified on black so small
/// regressions are visible at a glance.
///
/// Callers must pass images of equal dimensions.
pub fn diff_images(baseline: &RgbaImage, current: &RgbaImage, sensitivity: u8) -> PixelDiff {
    let (width, height) = baseline.dimensions();
    let mut image = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = baseline.get_pixel(x, y);
            let b = current.get_pixel(x, y);

            let dr = channel_delta(a[0], b[0]);
            let dg = channel_delta(a[1], b[1]);
            let db = channel_delta(a[2], b[2]);
            let delta = dr.max(dg).max(db);

            if delta > sensitivity as u32 {
                diff_pixels += 1;
                image.put_pixel(
                    x,
                    y,
                    Rgba([
                        amplify(dr),
                        amplify(dg),
                        amplify(db),
                        255,
                    ]),
                );
            } else {
                image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
    }

    PixelDiff {
        diff_pixels,
        total_pixels: width as u64 * height as u64,
        image,
    }
}

fn channel_delta(a: u8, b: u8) -> u32 {
    (a as i32 - b as i32).unsigned_abs()
}

fn amplify(delta: u32) -> u8 {
    (delta * 4).min(255) as u8
}
