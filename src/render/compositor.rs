use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use serde::Serialize;

use super::layout::{Align, CertificateLayout, TextStyle};
use super::template::CertificateAssets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Date,
    Serial,
}

#[derive(Debug, Clone)]
pub struct CertificateFields {
    pub name: String,
    pub date: String,
    pub serial: String,
}

/// Where a field's text box ended up on the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub field: Field,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

pub struct RenderedCertificate {
    pub image: RgbaImage,
    pub placements: Vec<Placement>,
}

/// Rendered extent of a string, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBox {
    pub width: u32,
    pub height: u32,
    /// Horizontal offset of the first inked pixel from the pen origin.
    pub left: i32,
}

pub fn measure(font: &Font<'static>, size: f32, text: &str) -> TextBox {
    let scale = Scale::uniform(size);
    let v_metrics = font.v_metrics(scale);
    let height = (v_metrics.ascent - v_metrics.descent).ceil().max(0.0) as u32;

    let mut min_x = i32::MAX;
    let mut max_x = i32::MIN;
    for glyph in font.layout(text, scale, point(0.0, v_metrics.ascent)) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            min_x = min_x.min(bb.min.x);
            max_x = max_x.max(bb.max.x);
        }
    }

    if min_x > max_x {
        return TextBox {
            width: 0,
            height,
            left: 0,
        };
    }
    TextBox {
        width: (max_x - min_x) as u32,
        height,
        left: min_x,
    }
}

/// Top-left corner of a `text_box` placed according to `style`.
pub fn place(style: &TextStyle, text_box: TextBox) -> (i32, i32) {
    let x = match style.align {
        Align::Center => style.x - (text_box.width as i32) / 2,
        Align::Left => style.x,
    };
    let y = style.y - (text_box.height as i32) / 2;
    (x, y)
}

/// Draws name, date and serial onto a copy of the template.
pub fn render(
    assets: &CertificateAssets,
    layout: &CertificateLayout,
    fields: &CertificateFields,
) -> RenderedCertificate {
    let mut image = assets.template.clone();
    let fonts = &assets.fonts;

    let jobs = [
        (Field::Name, &fonts.name, &layout.name, fields.name.as_str()),
        (Field::Date, &fonts.date, &layout.date, fields.date.as_str()),
        (Field::Serial, &fonts.serial, &layout.serial, fields.serial.as_str()),
    ];

    let placements = jobs
        .into_iter()
        .map(|(field, font, style, text)| {
            let text_box = measure(font, style.size, text);
            let (x, y) = place(style, text_box);
            let [r, g, b] = style.color;
            draw_text(&mut image, font, style.size, x - text_box.left, y, Rgba([r, g, b, 255]), text);
            Placement {
                field,
                x,
                y,
                width: text_box.width,
                height: text_box.height,
            }
        })
        .collect();

    RenderedCertificate { image, placements }
}

fn draw_text(
    img: &mut RgbaImage,
    font: &Font<'static>,
    size: f32,
    x: i32,
    y: i32,
    color: Rgba<u8>,
    text: &str,
) {
    let scale = Scale::uniform(size);
    let v_metrics = font.v_metrics(scale);
    let origin = point(x as f32, y as f32 + v_metrics.ascent);

    for glyph in font.layout(text, scale, origin) {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, v| {
            let px = gx as i32 + bb.min.x;
            let py = gy as i32 + bb.min.y;
            if px < 0 || py < 0 {
                return;
            }
            let (px, py) = (px as u32, py as u32);
            if px >= img.width() || py >= img.height() {
                return;
            }
            let alpha = v.clamp(0.0, 1.0);
            if alpha == 0.0 {
                return;
            }
            let dst = img.get_pixel_mut(px, py);
            let inv = 1.0 - alpha;
            for c in 0..3 {
                dst.0[c] = (color.0[c] as f32 * alpha + dst.0[c] as f32 * inv).round() as u8;
            }
            dst.0[3] = 255;
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::template::FontSet;
    use std::path::PathBuf;

    const FONT_CANDIDATES: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/Library/Fonts/Arial.ttf",
    ];

    /// First TrueType font installed on this machine, if any.
    pub(crate) fn system_font() -> Option<PathBuf> {
        FONT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    fn style(x: i32, y: i32, align: Align) -> TextStyle {
        TextStyle {
            font_path: PathBuf::from("unused.ttf"),
            size: 40.0,
            color: [0, 0, 0],
            x,
            y,
            align,
        }
    }

    fn fields() -> CertificateFields {
        CertificateFields {
            name: "Jane Doe".to_string(),
            date: "January 01, 2025".to_string(),
            serial: "PY2025-0001".to_string(),
        }
    }

    fn assets_for(font: &std::path::Path) -> (CertificateLayout, CertificateAssets) {
        let mut layout = CertificateLayout::standard("unused.png", font);
        layout.width = 1200;
        layout.height = 800;
        layout.name.x = 600;
        layout.name.y = 400;
        layout.date.x = 200;
        layout.date.y = 560;
        layout.serial.x = 600;
        layout.serial.y = 720;
        let assets = CertificateAssets {
            template: RgbaImage::from_pixel(1200, 800, Rgba([255, 255, 255, 255])),
            fonts: FontSet::load(&layout).unwrap(),
        };
        (layout, assets)
    }

    #[test]
    fn centered_box_straddles_anchor() {
        let text_box = TextBox { width: 200, height: 50, left: 3 };
        assert_eq!(place(&style(600, 400, Align::Center), text_box), (500, 375));
    }

    #[test]
    fn left_aligned_box_starts_at_anchor() {
        let text_box = TextBox { width: 200, height: 50, left: 3 };
        assert_eq!(place(&style(150, 400, Align::Left), text_box), (150, 375));
    }

    #[test]
    fn placement_is_deterministic() {
        let Some(font) = system_font() else {
            eprintln!("no system font found, skipping");
            return;
        };
        let (layout, assets) = assets_for(&font);

        let first = render(&assets, &layout, &fields());
        let second = render(&assets, &layout, &fields());

        assert_eq!(first.placements, second.placements);
        assert_eq!(first.image.as_raw(), second.image.as_raw());
    }

    #[test]
    fn fields_land_where_the_layout_says() {
        let Some(font) = system_font() else {
            eprintln!("no system font found, skipping");
            return;
        };
        let (layout, assets) = assets_for(&font);
        let rendered = render(&assets, &layout, &fields());

        let name = rendered.placements[0];
        assert_eq!(name.field, Field::Name);
        assert!(name.width > 0);
        assert!((name.x + name.width as i32 / 2 - layout.name.x).abs() <= 1);

        let date = rendered.placements[1];
        assert_eq!(date.field, Field::Date);
        assert_eq!(date.x, layout.date.x);

        let serial = rendered.placements[2];
        assert_eq!(serial.field, Field::Serial);
        assert!((serial.x + serial.width as i32 / 2 - layout.serial.x).abs() <= 1);
    }

    #[test]
    fn template_is_not_mutated() {
        let Some(font) = system_font() else {
            eprintln!("no system font found, skipping");
            return;
        };
        let (layout, assets) = assets_for(&font);
        let rendered = render(&assets, &layout, &fields());

        assert!(assets.template.pixels().all(|p| p.0 == [255, 255, 255, 255]));
        assert!(rendered.image.pixels().any(|p| p.0 != [255, 255, 255, 255]));
    }

    #[test]
    fn wider_text_measures_wider() {
        let Some(font) = system_font() else {
            eprintln!("no system font found, skipping");
            return;
        };
        let font = crate::render::template::load_font(&font).unwrap();
        let short = measure(&font, 40.0, "Jo");
        let long = measure(&font, 40.0, "Johanna Doe-Smith");
        assert!(long.width > short.width);
        assert_eq!(short.height, long.height);
        assert_eq!(measure(&font, 40.0, "").width, 0);
    }
}
