//! Self-contained HTML page for a digest.

use html_escape::encode_safe;

use crate::domain::digest::{Digest, DigestEntry};
use crate::domain::email::BodyFormat;

const HTML_WRAP_WIDTH: usize = 100;

const STYLE: &str = r#"
    body { font-family: Arial, sans-serif; line-height: 1.6; background-color: #f9f9f9; padding: 20px; }
    h1 { color: #333; }
    h2 { color: #4CAF50; }
    h3 { color: #FF5722; }
    .email-content { border-bottom: 2px solid #ddd; padding-bottom: 10px; margin-bottom: 10px; }
    .date { color: #999; }
    .badge { font-size: 0.8em; padding: 2px 6px; border-radius: 4px; color: #fff; }
    .new { background-color: #4CAF50; }
    .old { background-color: #999; }
    .body { white-space: pre-wrap; }
"#;

pub fn render_digest(digest: &Digest) -> String {
    render_entries(&digest.entries())
}

pub fn render_entries(entries: &[DigestEntry]) -> String {
    let mut out = String::with_capacity(1024 + entries.len() * 512);
    out.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Email Summary</title>");
    out.push_str("<style>");
    out.push_str(STYLE);
    out.push_str("</style></head><body>\n<h1>Email Summary</h1>\n");

    if entries.is_empty() {
        out.push_str("<p>No matching emails found.</p>\n");
    }

    for e in entries {
        let (badge_class, badge) = if e.read { ("old", "Read") } else { ("new", "New") };
        out.push_str("<div class=\"email-content\">");
        out.push_str(&format!(
            "<span class=\"badge {badge_class}\">{badge}</span>"
        ));
        out.push_str(&format!("<h2>From: {}</h2>", encode_safe(&e.sender)));
        out.push_str(&format!("<h3>Subject: {}</h3>", encode_safe(&e.subject)));
        out.push_str(&format!(
            "<p class=\"date\">Date: {} {}</p>",
            encode_safe(&e.date),
            encode_safe(&e.time)
        ));
        out.push_str(&format!(
            "<div class=\"body\">{}</div><hr></div>\n",
            encode_safe(&body_text(e))
        ));
    }

    out.push_str("</body></html>\n");
    out
}

fn body_text(e: &DigestEntry) -> String {
    match e.body_format {
        BodyFormat::Plain => e.body.clone(),
        BodyFormat::Html => html2text::from_read(e.body.as_bytes(), HTML_WRAP_WIDTH)
            .unwrap_or_else(|err| {
                log::warn!("could not flatten HTML body: {err}");
                e.body.clone()
            }),
    }
}
