//! Template loading and text compositing.

mod compositor;
mod layout;
mod template;

pub use compositor::{measure, place, render, CertificateFields, Field, Placement, RenderedCertificate, TextBox};
pub use layout::{Align, CertificateLayout, LayoutSource, TextStyle};
pub use template::{load_font, load_template, CertificateAssets, FontSet};

#[cfg(test)]
pub(crate) use compositor::tests::system_font;
