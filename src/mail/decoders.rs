use base64::{Engine as _, engine::general_purpose};
use charset::Charset;

/// Tried in order after any declared charset. Turkish mail servers still emit
/// undeclared ISO-8859-9 and Windows-1254 text.
///
/// `charset` follows the WHATWG label table, where `iso-8859-9` resolves to
/// the windows-1254 decoder. That decoder maps every byte, so the chain
/// always succeeds by its second entry and 0x80..=0x9F come out as
/// windows-1254 characters (0x80 is `€`) rather than C1 controls.
pub const FALLBACK_CHARSETS: [&str; 3] = ["utf-8", "iso-8859-9", "windows-1254"];

/// Strict decode with a single charset label; `None` on unknown label or malformed input.
fn decode_strict(bytes: &[u8], label: &str) -> Option<String> {
    let cs = Charset::for_label(label.trim().as_bytes())?;
    let (text, had_errors) = cs.decode_without_bom_handling(bytes);
    (!had_errors).then(|| text.into_owned())
}

/// Decode `bytes` with the declared charset if any, then the fallback chain.
/// Returns the first successful decoding, or `None` if every decoder rejects the input.
pub fn decode_with_fallback(bytes: &[u8], declared: Option<&str>) -> Option<String> {
    declared
        .into_iter()
        .chain(FALLBACK_CHARSETS)
        .find_map(|label| decode_strict(bytes, label))
}

fn decode_or_lossy(bytes: &[u8], declared: Option<&str>) -> String {
    decode_with_fallback(bytes, declared)
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

enum Segment<'a> {
    Literal(&'a [u8]),
    Encoded { charset: String, bytes: Vec<u8> },
}

/// Decode a raw header value that may contain RFC 2047 encoded words,
/// possibly in several different charsets. Undeclared text goes through the
/// fallback chain.
pub fn decode_header_value(raw: &[u8]) -> String {
    let unfolded = unfold(raw);
    let segments = merge_adjacent(split_encoded_words(&unfolded));

    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Literal(b) => out.push_str(&decode_or_lossy(b, None)),
            Segment::Encoded { charset, bytes } => {
                out.push_str(&decode_or_lossy(&bytes, Some(&charset)))
            }
        }
    }
    out.trim().to_string()
}

fn unfold(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect()
}

fn split_encoded_words(input: &[u8]) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i + 1 < input.len() {
        if input[i] == b'=' && input[i + 1] == b'?' {
            if let Some((seg, len)) = parse_encoded_word(&input[i..]) {
                if literal_start < i {
                    out.push(Segment::Literal(&input[literal_start..i]));
                }
                out.push(seg);
                i += len;
                literal_start = i;
                continue;
            }
        }
        i += 1;
    }
    if literal_start < input.len() {
        out.push(Segment::Literal(&input[literal_start..]));
    }
    out
}

/// Parses `=?charset?E?text?=` at the start of `input`, returning the segment
/// and the number of bytes consumed.
fn parse_encoded_word(input: &[u8]) -> Option<(Segment<'static>, usize)> {
    let body = input.get(2..)?;
    let q1 = body.iter().position(|b| *b == b'?')?;
    let charset = std::str::from_utf8(&body[..q1]).ok()?;
    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    if charset.is_empty() {
        return None;
    }

    let enc = *body.get(q1 + 1)?;
    if body.get(q1 + 2) != Some(&b'?') {
        return None;
    }
    let text_start = q1 + 3;
    let text_len = body
        .get(text_start..)?
        .windows(2)
        .position(|w| w == b"?=")?;
    let text = &body[text_start..text_start + text_len];
    if text.iter().any(|b| b.is_ascii_whitespace()) {
        return None;
    }

    let bytes = match enc {
        b'B' | b'b' => decode_b(text)?,
        b'Q' | b'q' => decode_q(text),
        _ => return None,
    };
    let consumed = 2 + text_start + text_len + 2;
    Some((
        Segment::Encoded {
            charset: charset.to_string(),
            bytes,
        },
        consumed,
    ))
}

fn decode_b(text: &[u8]) -> Option<Vec<u8>> {
    general_purpose::STANDARD
        .decode(text)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(text))
        .ok()
}

fn decode_q(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < text.len() => {
                let hex = std::str::from_utf8(&text[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

/// Whitespace between encoded words is dropped, and consecutive words in the
/// same charset are joined before decoding so split multibyte sequences survive.
fn merge_adjacent(segments: Vec<Segment<'_>>) -> Vec<Segment<'_>> {
    let mut out: Vec<Segment<'_>> = Vec::with_capacity(segments.len());
    let mut iter = segments.into_iter().peekable();

    while let Some(seg) = iter.next() {
        match seg {
            Segment::Literal(b) if b.iter().all(|c| c.is_ascii_whitespace()) => {
                let between_words = matches!(out.last(), Some(Segment::Encoded { .. }))
                    && matches!(iter.peek(), Some(Segment::Encoded { .. }));
                if !between_words {
                    out.push(Segment::Literal(b));
                }
            }
            Segment::Encoded { charset, bytes } => {
                if let Some(Segment::Encoded {
                    charset: prev_cs,
                    bytes: prev_bytes,
                }) = out.last_mut()
                    && prev_cs.eq_ignore_ascii_case(&charset)
                {
                    prev_bytes.extend_from_slice(&bytes);
                    continue;
                }
                out.push(Segment::Encoded { charset, bytes });
            }
            lit => out.push(lit),
        }
    }
    out
}

pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}
