use std::borrow::Cow;

fn is_control(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and tag names come from remote documents and user input and
/// end up printed to a terminal, so CSI (`\x1b[...`), OSC (`\x1b]...` up to
/// BEL or ST), bare ESC and C0/DEL bytes are removed. Tab, newline and
/// carriage return survive.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| b == 0x1b || is_control(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        match bytes[i] {
            0x1b if bytes.get(i + 1) == Some(&b'[') => {
                // CSI: parameters until a final byte in 0x40..=0x7e
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            }
            0x1b if bytes.get(i + 1) == Some(&b']') => {
                // OSC: until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b if b == 0x1b || is_control(b) => i += 1,
            _ => {
                let start = i;
                while i < len && bytes[i] != 0x1b && !is_control(bytes[i]) {
                    i += 1;
                }
                // Only ASCII bytes end a run, so the slice is on a char boundary
                out.push_str(&s[start..i]);
            }
        }
    }

    Cow::Owned(out)
}

/// Plain-text excerpt of an HTML body for terminal listings.
///
/// Drops tags, decodes the handful of entities feeds commonly use,
/// collapses whitespace and cuts at `max_chars` characters with "...".
pub fn html_excerpt(html: &str, max_chars: usize) -> String {
    let mut text = String::with_capacity(html.len().min(max_chars * 2));
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    let clean = strip_control_chars(&collapsed);

    if clean.chars().count() <= max_chars {
        return clean.into_owned();
    }
    let cut: String = clean.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
