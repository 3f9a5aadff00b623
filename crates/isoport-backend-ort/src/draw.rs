use std::io::Cursor;

use ab_glyph::{Font, FontRef, PxScale};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::postprocess::BBox;

pub const BOX_THICKNESS: u32 = 2;
pub const LABEL_SCALE: f32 = 16.0;
/// Vertical distance between a box's top edge and its label baseline.
const LABEL_OFFSET: i32 = 15;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

pub fn label_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(LABEL_FONT).context("loading label font")
}

/// Stable, well-spread colour per class id.
pub fn class_color(class_id: u32) -> Rgb<u8> {
    // Golden-ratio hue stepping, full saturation and value.
    let hue = (class_id as f32 * 0.618_034).fract() * 6.0;
    let x = 1.0 - ((hue % 2.0) - 1.0).abs();
    let (r, g, b) = match hue as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

/// Outline `bbox` (rounded to whole pixels), clipped to the image.
pub fn draw_box(image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let (fw, fh) = (w as f32, h as f32);
    if bbox.x + bbox.w < 0.0 || bbox.x >= fw || bbox.y + bbox.h < 0.0 || bbox.y >= fh {
        return;
    }
    let clamp_x = |v: f32| v.round().clamp(0.0, (w - 1) as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, (h - 1) as f32) as u32;
    let (left, right) = (clamp_x(bbox.x), clamp_x(bbox.x + bbox.w));
    let (top, bottom) = (clamp_y(bbox.y), clamp_y(bbox.y + bbox.h));

    for t in 0..thickness {
        for x in left..=right {
            image.put_pixel(x, (top + t).min(bottom), color);
            image.put_pixel(x, bottom.saturating_sub(t).max(top), color);
        }
        for y in top..=bottom {
            image.put_pixel((left + t).min(right), y, color);
            image.put_pixel(right.saturating_sub(t).max(left), y, color);
        }
    }
}

/// Baseline row for a label: above the box when there is room, otherwise
/// just inside its top edge.
pub fn label_baseline(top: i32) -> i32 {
    if top - LABEL_OFFSET > LABEL_OFFSET {
        top - LABEL_OFFSET
    } else {
        top + LABEL_OFFSET
    }
}

/// Write `text` starting at the box's left edge, sitting on [`label_baseline`].
pub fn draw_label(image: &mut RgbImage, font: &impl Font, text: &str, bbox: &BBox, color: Rgb<u8>) {
    let scale = PxScale::from(LABEL_SCALE);
    let (_, text_h) = text_size(scale, font, text);
    let x = bbox.x.round() as i32;
    let y = label_baseline(bbox.y.round() as i32) - text_h as i32;
    draw_text_mut(image, color, x, y, scale, font, text);
}

pub fn encode_jpeg_base64(image: RgbImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("encoding jpeg")?;
    Ok(STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_are_stable_and_distinct() {
        assert_eq!(class_color(3), class_color(3));
        assert_ne!(class_color(0), class_color(1));
        assert_ne!(class_color(1), class_color(2));
    }

    #[test]
    fn box_outline_is_drawn_and_clipped() {
        let mut img = RgbImage::new(20, 20);
        let red = Rgb([255, 0, 0]);
        draw_box(
            &mut img,
            &BBox { x: -5.0, y: 2.0, w: 15.0, h: 100.0 },
            red,
            BOX_THICKNESS,
        );
        // left edge clipped to 0, bottom clipped to 19
        assert_eq!(*img.get_pixel(0, 10), red);
        assert_eq!(*img.get_pixel(1, 10), red);
        assert_eq!(*img.get_pixel(10, 2), red);
        assert_eq!(*img.get_pixel(5, 19), red);
        // interior untouched
        assert_eq!(*img.get_pixel(5, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_image_are_skipped() {
        let mut img = RgbImage::new(20, 20);
        let red = Rgb([255, 0, 0]);
        for bbox in [
            BBox { x: -30.0, y: 5.0, w: 10.0, h: 5.0 },
            BBox { x: 20.0, y: 5.0, w: 10.0, h: 5.0 },
            BBox { x: 5.0, y: -30.0, w: 5.0, h: 10.0 },
            BBox { x: 5.0, y: 25.0, w: 5.0, h: 10.0 },
        ] {
            draw_box(&mut img, &bbox, red, BOX_THICKNESS);
        }
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn label_sits_above_the_box_when_there_is_room() {
        assert_eq!(label_baseline(60), 45);
        assert_eq!(label_baseline(31), 16);
        assert_eq!(label_baseline(30), 45);
        assert_eq!(label_baseline(0), 15);
    }

    fn red_rows(img: &RgbImage) -> Vec<u32> {
        img.enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 128 && p[1] < 64 && p[2] < 64)
            .map(|(_, y, _)| y)
            .collect()
    }

    #[test]
    fn label_pixels_land_above_a_low_box() {
        let font = label_font().unwrap();
        let mut img = RgbImage::new(160, 100);
        let bbox = BBox { x: 10.0, y: 60.0, w: 50.0, h: 30.0 };
        draw_label(&mut img, &font, "person:0.88", &bbox, Rgb([255, 0, 0]));

        let rows = red_rows(&img);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|y| *y < 60), "label overlaps the box: {rows:?}");
        assert!(rows.iter().any(|y| *y >= 30));
    }

    #[test]
    fn label_moves_inside_a_box_at_the_top_edge() {
        let font = label_font().unwrap();
        let mut img = RgbImage::new(160, 100);
        let bbox = BBox { x: 10.0, y: 5.0, w: 50.0, h: 60.0 };
        draw_label(&mut img, &font, "dog:0.51", &bbox, Rgb([255, 0, 0]));

        let rows = red_rows(&img);
        assert!(!rows.is_empty());
        assert!(rows.iter().any(|y| *y > 5 + BOX_THICKNESS));
    }

    #[test]
    fn jpeg_round_trips_dimensions() {
        let encoded = encode_jpeg_base64(RgbImage::new(8, 6)).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }
}
