use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates `s` to at most `max_width` terminal columns, appending "..." when cut.
///
/// Widths of 3 or less return as many characters as fit, without an ellipsis.
/// Zero-width characters never count toward the limit.
///
/// ```
/// use feedengine::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width <= ELLIPSIS_WIDTH {
        return Cow::Owned(prefix_within(s, max_width).to_string());
    }
    let head = prefix_within(s, max_width - ELLIPSIS_WIDTH);
    Cow::Owned(format!("{head}{ELLIPSIS}"))
}

// Longest prefix of `s` that fits in `width` columns.
fn prefix_within(s: &str, width: usize) -> &str {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        used += UnicodeWidthChar::width(c).unwrap_or(0);
        if used > width {
            return &s[..idx];
        }
    }
    s
}

/// Strips terminal control characters and ANSI escape sequences from feed text
/// before it is printed. Tab, newline and carriage return are kept.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));
    if !s.contains(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_control(c) {
                out.push(c);
            }
            continue;
        }
        match chars.peek() {
            // CSI: parameters up to a final byte in @..~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: up to BEL or ESC \
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    Cow::Owned(out)
}

/// Heuristic for text that was declared plain but is really HTML: a tag-like
/// `<x`, `</x` or `<!` sequence closed by `>`, or a character reference.
pub fn looks_like_html(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => {
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                if (next.is_ascii_alphabetic() || next == b'/' || next == b'!')
                    && bytes[i + 1..].contains(&b'>')
                {
                    return true;
                }
            }
            b'&' => {
                if is_char_reference(&bytes[i + 1..]) {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

// `name;` or `#123;` or `#x1F;` right after an ampersand.
fn is_char_reference(rest: &[u8]) -> bool {
    let end = match rest.iter().take(12).position(|&b| b == b';') {
        Some(end) if end > 0 => end,
        _ => return false,
    };
    let body = &rest[..end];
    match body {
        [b'#', b'x' | b'X', hex @ ..] => !hex.is_empty() && hex.iter().all(u8::is_ascii_hexdigit),
        [b'#', dec @ ..] => !dec.is_empty() && dec.iter().all(u8::is_ascii_digit),
        name => name.iter().all(u8::is_ascii_alphanumeric),
    }
}

/// Escapes `&`, `<` and `>` for re-serialized markup text.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    escape_with(text, false)
}

/// Escapes text for use inside a double-quoted attribute value.
pub fn escape_attribute(text: &str) -> Cow<'_, str> {
    escape_with(text, true)
}

fn escape_with(text: &str, quotes: bool) -> Cow<'_, str> {
    let needs = |c: char| matches!(c, '&' | '<' | '>') || (quotes && c == '"');
    if !text.contains(needs) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Splits an RSS author string into `(email, name)`.
///
/// Understands `email (Name)`, `Name <email>` and a bare address or name.
/// Either part may be absent.
pub fn parse_author(raw: &str) -> (Option<String>, Option<String>) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, None);
    }

    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    if let (Some(open), true) = (raw.find('('), raw.ends_with(')')) {
        let email = non_empty(&raw[..open]);
        let name = non_empty(&raw[open + 1..raw.len() - 1]);
        return (email, name);
    }

    if let (Some(open), true) = (raw.find('<'), raw.ends_with('>')) {
        let name = non_empty(&raw[..open]);
        let email = non_empty(&raw[open + 1..raw.len() - 1]);
        return (email, name);
    }

    if raw.contains('@') && !raw.contains(char::is_whitespace) {
        (Some(raw.to_string()), None)
    } else {
        (None, Some(raw.to_string()))
    }
}
