// Certificate document export.
// The composited raster is flattened to RGB and either embedded in a
// single-page PDF sized for 300 DPI, or written out as a PNG.
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;

use crate::error::ExportError;

pub const EXPORT_DPI: f32 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Png,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Png => "png",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "png" => Ok(DocumentFormat::Png),
            other => Err(format!("unsupported certificate format '{}'", other)),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

impl ExportedDocument {
    /// Attachment name, `certificate.<ext>`.
    pub fn filename(&self) -> String {
        format!("certificate.{}", self.format.extension())
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_path(self.filename())
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Composites any transparency onto white.
pub fn flatten_to_rgb(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let a = p.0[3] as f32 / 255.0;
        let inv = 1.0 - a;
        let blend = |c: u8| (c as f32 * a + 255.0 * inv).round() as u8;
        image::Rgb([blend(p.0[0]), blend(p.0[1]), blend(p.0[2])])
    })
}

pub fn export(image: &RgbaImage, format: DocumentFormat) -> Result<ExportedDocument, ExportError> {
    let rgb = flatten_to_rgb(image);
    let bytes = match format {
        DocumentFormat::Pdf => encode_pdf(&rgb)?,
        DocumentFormat::Png => encode_png(rgb)?,
    };
    Ok(ExportedDocument { format, bytes })
}

fn encode_png(rgb: RgbImage) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Page size in points for a raster printed at [`EXPORT_DPI`].
pub fn page_size_pt(width_px: u32, height_px: u32) -> (f32, f32) {
    (
        width_px as f32 * 72.0 / EXPORT_DPI,
        height_px as f32 * 72.0 / EXPORT_DPI,
    )
}

fn encode_pdf(rgb: &RgbImage) -> Result<Vec<u8>, ExportError> {
    let (width_px, height_px) = rgb.dimensions();
    let (width_pt, height_pt) = page_size_pt(width_px, height_px);

    // Flate keeps fine text lossless, unlike DCT.
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(rgb.as_raw())?;
    let pixels = encoder.finish()?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width_px as i64,
            "Height" => height_px as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        pixels,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width_pt.into(),
                    0.into(),
                    0.into(),
                    height_pt.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Certificate"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
