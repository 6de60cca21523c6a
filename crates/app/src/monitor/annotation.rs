use anyhow::{Result, anyhow};
use image::{DynamicImage, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use ml_core::{BoxXywh, Detection};

pub(crate) const BOX_COLOR: Rgb<u8> = Rgb([226, 43, 138]);
pub(crate) const BOX_THICKNESS: i64 = 3;

/// Draw every detection onto a copy of `image` and encode it as JPEG.
pub(crate) fn render_detections(
    image: &DynamicImage,
    detections: &[Detection],
    jpeg_quality: u8,
) -> Result<Vec<u8>> {
    let mut canvas = image.to_rgb8();
    for detection in detections {
        draw_rectangle(&mut canvas, &detection.bbox, BOX_COLOR, BOX_THICKNESS);
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100))
        .encode_image(&canvas)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Outline `bbox` with a stroke centred on its edges. Pixels that fall off
/// the canvas are skipped rather than clamped onto the border.
fn draw_rectangle(image: &mut RgbImage, bbox: &BoxXywh, color: Rgb<u8>, thickness: i64) {
    let left = bbox.x as i64;
    let top = bbox.y as i64;
    let right = left + bbox.width as i64;
    let bottom = top + bbox.height as i64;

    let half = thickness.max(1) / 2;
    let low = -half;
    let high = thickness.max(1) - 1 - half;
    for offset in low..=high {
        draw_outline(image, left - offset, top - offset, right + offset, bottom + offset, color);
    }
}

fn draw_outline(image: &mut RgbImage, left: i64, top: i64, right: i64, bottom: i64, color: Rgb<u8>) {
    let width = image.width() as i64;
    let height = image.height() as i64;
    if width == 0 || height == 0 {
        return;
    }

    let x_start = left.max(0);
    let x_end = right.min(width - 1);
    for y in [top, bottom] {
        if (0..height).contains(&y) {
            for x in x_start..=x_end {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }

    let y_start = top.max(0);
    let y_end = bottom.min(height - 1);
    for x in [left, right] {
        if (0..width).contains(&x) {
            for y in y_start..=y_end {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
