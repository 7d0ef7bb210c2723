use std::sync::OnceLock;

use axum::response::Html;
use tera::{Context, Tera};

static TERA: OnceLock<Tera> = OnceLock::new();

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("record.html", include_str!("../templates/record.html")),
    ("data_record.html", include_str!("../templates/data_record.html")),
    ("sandbox.html", include_str!("../templates/sandbox.html")),
    ("sandbox_list.html", include_str!("../templates/sandbox_list.html")),
    ("error_page.html", include_str!("../templates/error_page.html")),
    ("404.html", include_str!("../templates/404.html")),
    (
        "email/review_message.html",
        include_str!("../templates/email/review_message.html"),
    ),
    (
        "email/new_upload.html",
        include_str!("../templates/email/new_upload.html"),
    ),
];

pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())
            .expect("Failed to load templates");
        tera
    })
}

pub fn render(name: &str, ctx: &Context) -> Result<Html<String>, tera::Error> {
    get_tera().render(name, ctx).map(Html)
}
