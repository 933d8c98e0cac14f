use std::sync::OnceLock;
use tera::Tera;

static TERA: OnceLock<Tera> = OnceLock::new();

const PAGES: &[(&str, &str)] = &[
    ("index.html", include_str!("../templates/index.html")),
    ("result.html", include_str!("../templates/result.html")),
];

pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        if let Err(e) = tera.add_raw_templates(PAGES.iter().copied()) {
            tracing::error!("Failed to load templates: {}", e);
        }
        tera
    })
}
