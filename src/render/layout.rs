use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ResourceError;

// A4 landscape at 300 DPI.
pub const DEFAULT_WIDTH: u32 = 3508;
pub const DEFAULT_HEIGHT: u32 = 2480;

pub const CERTIFICATE_COLOR: [u8; 3] = [198, 194, 177];
pub const SERIAL_COLOR: [u8; 3] = [96, 96, 96];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    /// Text box centered on the anchor x.
    Center,
    /// Text box starts at the anchor x.
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextStyle {
    pub font_path: PathBuf,
    /// Pixel height of the font.
    pub size: f32,
    pub color: [u8; 3],
    pub x: i32,
    /// Vertical center line of the text box.
    pub y: i32,
    pub align: Align,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateLayout {
    pub template_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub name: TextStyle,
    pub date: TextStyle,
    pub serial: TextStyle,
}

impl CertificateLayout {
    /// Built-in layout: name centered mid-page, date left-aligned below it,
    /// serial centered near the bottom edge.
    pub fn standard(template_path: impl Into<PathBuf>, font_path: impl Into<PathBuf>) -> Self {
        let font_path = font_path.into();
        let width = DEFAULT_WIDTH;
        let height = DEFAULT_HEIGHT;

        Self {
            template_path: template_path.into(),
            width,
            height,
            name: TextStyle {
                font_path: font_path.clone(),
                size: 160.0,
                color: CERTIFICATE_COLOR,
                x: (width / 2) as i32,
                y: (height as f32 * 0.5) as i32,
                align: Align::Center,
            },
            date: TextStyle {
                font_path: font_path.clone(),
                size: 96.0,
                color: CERTIFICATE_COLOR,
                x: (width as f32 * 0.18) as i32,
                y: (height as f32 * 0.7) as i32,
                align: Align::Left,
            },
            serial: TextStyle {
                font_path,
                size: 56.0,
                color: SERIAL_COLOR,
                x: (width / 2) as i32,
                y: (height as f32 * 0.9) as i32,
                align: Align::Center,
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ResourceError> {
        let layout_err = |message: String| ResourceError::Layout {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| layout_err(e.to_string()))?;
        let layout: CertificateLayout =
            serde_json::from_str(&text).map_err(|e| layout_err(e.to_string()))?;
        if layout.width == 0 || layout.height == 0 {
            return Err(layout_err("output dimensions must be non-zero".to_string()));
        }
        Ok(layout)
    }
}

/// Where the layout for each issuance comes from.
#[derive(Debug, Clone)]
pub struct LayoutSource {
    /// Optional JSON layout file; overrides the built-in layout entirely.
    pub layout_path: Option<PathBuf>,
    pub template_path: PathBuf,
    pub font_path: PathBuf,
}

impl LayoutSource {
    pub fn load(&self) -> Result<CertificateLayout, ResourceError> {
        match &self.layout_path {
            Some(path) => CertificateLayout::from_file(path),
            None => Ok(CertificateLayout::standard(&self.template_path, &self.font_path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_anchors() {
        let layout = CertificateLayout::standard("template.png", "font.ttf");
        assert_eq!(layout.name.x, 1754);
        assert_eq!(layout.name.y, 1240);
        assert_eq!(layout.date.align, Align::Left);
        assert_eq!(layout.serial.align, Align::Center);
    }

    #[test]
    fn layout_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        let layout = CertificateLayout::standard("t.png", "f.ttf");
        std::fs::write(&path, serde_json::to_string(&layout).unwrap()).unwrap();

        let source = LayoutSource {
            layout_path: Some(path),
            template_path: "ignored.png".into(),
            font_path: "ignored.ttf".into(),
        };
        let loaded = source.load().unwrap();
        assert_eq!(loaded.template_path, PathBuf::from("t.png"));
        assert_eq!(loaded.date.x, layout.date.x);
    }

    #[test]
    fn layout_file_errors_are_resource_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, r#"{"width": 0}"#).unwrap();
        assert!(matches!(
            CertificateLayout::from_file(&path),
            Err(ResourceError::Layout { .. })
        ));
        assert!(CertificateLayout::from_file(&dir.path().join("missing.json")).is_err());
    }
}
