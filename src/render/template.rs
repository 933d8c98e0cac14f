use image::imageops::FilterType;
use image::RgbaImage;
use rusttype::Font;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::layout::CertificateLayout;
use crate::error::ResourceError;

/// Loads the background and resizes it to the layout's output size.
pub fn load_template(layout: &CertificateLayout) -> Result<RgbaImage, ResourceError> {
    let path = &layout.template_path;
    let image = image::open(path).map_err(|e| ResourceError::Template {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let image = image.to_rgba8();
    if image.dimensions() == (layout.width, layout.height) {
        return Ok(image);
    }

    debug!(
        from = ?image.dimensions(),
        to = ?(layout.width, layout.height),
        "Resizing certificate template"
    );
    Ok(image::imageops::resize(
        &image,
        layout.width,
        layout.height,
        FilterType::Lanczos3,
    ))
}

pub fn load_font(path: &Path) -> Result<Font<'static>, ResourceError> {
    let font_err = |message: String| ResourceError::Font {
        path: path.display().to_string(),
        message,
    };
    let bytes = std::fs::read(path).map_err(|e| font_err(e.to_string()))?;
    Font::try_from_vec(bytes).ok_or_else(|| font_err("not a valid TrueType/OpenType font".to_string()))
}

pub struct FontSet {
    pub name: Font<'static>,
    pub date: Font<'static>,
    pub serial: Font<'static>,
}

impl FontSet {
    pub fn load(layout: &CertificateLayout) -> Result<Self, ResourceError> {
        let mut cache: HashMap<PathBuf, Font<'static>> = HashMap::new();
        let mut get = |path: &Path| -> Result<Font<'static>, ResourceError> {
            if let Some(font) = cache.get(path) {
                return Ok(font.clone());
            }
            let font = load_font(path)?;
            cache.insert(path.to_path_buf(), font.clone());
            Ok(font)
        };

        Ok(Self {
            name: get(&layout.name.font_path)?,
            date: get(&layout.date.font_path)?,
            serial: get(&layout.serial.font_path)?,
        })
    }
}

/// Everything a render needs, loaded before a serial is allocated.
pub struct CertificateAssets {
    pub template: RgbaImage,
    pub fonts: FontSet,
}

impl CertificateAssets {
    pub fn load(layout: &CertificateLayout) -> Result<Self, ResourceError> {
        let fonts = FontSet::load(layout)?;
        let template = load_template(layout)?;
        Ok(Self { template, fonts })
    }
}
