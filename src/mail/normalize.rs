use chrono::{DateTime, FixedOffset, NaiveDateTime};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use crate::domain::email::{BodyFormat, NormalizedRecord, RawMessage};
use crate::error::DecodeError;
use crate::mail::decoders::{decode_header_value, decode_with_fallback};

pub const NO_BODY: &str = "No body available";

/// Date layouts accepted when the header carries no zone; the result is read as UTC.
const NAIVE_DATE_FORMATS: [&str; 4] = [
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M",
];

/// Turn one fetched message into a record. The read flag comes from the
/// flags captured at fetch time.
pub fn normalize(raw: &RawMessage) -> Result<NormalizedRecord, DecodeError> {
    if raw.payload.is_empty() {
        return Err(DecodeError::MissingPayload { id: raw.id.clone() });
    }

    let parsed = mailparse::parse_mail(&raw.payload).map_err(|e| DecodeError::Parse {
        id: raw.id.clone(),
        reason: e.to_string(),
    })?;

    let subject = match parsed.headers.get_first_header("Subject") {
        Some(h) => decode_header_value(h.get_value_raw()),
        None => "(no subject)".to_string(),
    };

    let sender = match parsed.headers.get_first_header("From") {
        Some(h) => decode_header_value(h.get_value_raw()),
        None => "(unknown)".to_string(),
    };

    let date_value = parsed
        .headers
        .get_first_value("Date")
        .ok_or_else(|| DecodeError::MissingDate { id: raw.id.clone() })?;
    let timestamp = parse_date(&date_value).ok_or_else(|| DecodeError::InvalidDate {
        id: raw.id.clone(),
        value: date_value.clone(),
    })?;

    let (body, body_format) = extract_body(&parsed)
        .unwrap_or_else(|| (NO_BODY.to_string(), BodyFormat::Plain));

    Ok(NormalizedRecord {
        server_id: raw.id.clone(),
        subject,
        sender,
        body,
        body_format,
        timestamp,
        read: raw.seen,
    })
}

/// Parse an RFC 2822 date. Zone-less dates are taken as UTC so every
/// timestamp is comparable.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = strip_comment(value.trim());

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt);
    }

    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Drops a trailing `(UTC)`-style comment.
fn strip_comment(value: &str) -> &str {
    match value.rfind('(') {
        Some(idx) if value.ends_with(')') => value[..idx].trim_end(),
        _ => value,
    }
}

fn extract_body(parsed: &ParsedMail) -> Option<(String, BodyFormat)> {
    if parsed.subparts.is_empty() {
        let format = if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            BodyFormat::Html
        } else {
            BodyFormat::Plain
        };
        return decode_part(parsed).map(|b| (b, format));
    }

    let mut plain = None;
    let mut html = None;
    walk(parsed, &mut |part| {
        if is_attachment(part) {
            return;
        }
        let mime = part.ctype.mimetype.to_ascii_lowercase();
        if mime == "text/plain" && plain.is_none() {
            plain = Some(part);
        } else if mime == "text/html" && html.is_none() {
            html = Some(part);
        }
    });

    plain
        .and_then(|p| decode_part(p).map(|b| (b, BodyFormat::Plain)))
        .or_else(|| html.and_then(|p| decode_part(p).map(|b| (b, BodyFormat::Html))))
}

/// Depth-first, parent before children.
fn walk<'a>(part: &'a ParsedMail<'a>, visit: &mut impl FnMut(&'a ParsedMail<'a>)) {
    visit(part);
    for sp in &part.subparts {
        walk(sp, visit);
    }
}

fn is_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

fn decode_part(part: &ParsedMail) -> Option<String> {
    let bytes = part.get_body_raw().ok()?;
    // mailparse defaults the charset to us-ascii; only trust an explicit one
    let declared = part.ctype.params.get("charset").map(String::as_str);
    decode_with_fallback(&bytes, declared)
}
