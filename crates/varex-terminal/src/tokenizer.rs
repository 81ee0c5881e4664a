//! Quoting-aware token splitting for protocol lines.
//!
//! A token is either a run of bytes up to the next space, or a double-quoted
//! string with backslash escapes. [`next_token`] returns the decoded token and
//! the unconsumed remainder, which starts at the separating space (if any).

use std::fmt::Write;
use std::str::Chars;

/// Split the next token off `s`.
///
/// Returns `None` when no token is available (empty or whitespace-only
/// input) or when a quoted token is malformed: unterminated, or containing
/// an invalid escape sequence.
pub fn next_token(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }

    if !s.starts_with('"') {
        return Some(match s.find(' ') {
            Some(space) => (s[..space].to_string(), &s[space..]),
            None => (s.to_string(), ""),
        });
    }

    let end = closing_quote(s)?;
    let token = unescape(&s[1..end])?;
    Some((token, &s[end + 1..]))
}

/// Quote `s` so that [`next_token`] decodes it back unchanged.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", u32::from(c));
            },
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Byte offset of the quote closing the token that opens at `s[0]`.
fn closing_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Decode backslash escapes in the body of a quoted token.
///
/// Tokens are text, so every escape names a code point: `\xHH` and `\NNN`
/// decode to U+00HH and are stored UTF-8 encoded (`"\xff"` is the two bytes
/// `c3 bf`), never as a raw byte.
fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let esc = chars.next()?;
        let decoded = match esc {
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '\\' | '\'' | '"' => esc,
            'x' => fixed_hex(&mut chars, 2)?,
            'u' if chars.as_str().starts_with('{') => braced_hex(&mut chars)?,
            'u' => fixed_hex(&mut chars, 4)?,
            'U' => fixed_hex(&mut chars, 8)?,
            '0'..='7' => octal(esc, &mut chars)?,
            _ => return None,
        };
        out.push(decoded);
    }
    Some(out)
}

fn hex_value(digits: &str) -> Option<char> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    char::from_u32(u32::from_str_radix(digits, 16).ok()?)
}

fn fixed_hex(chars: &mut Chars<'_>, n: usize) -> Option<char> {
    let rest = chars.as_str();
    let c = hex_value(rest.get(..n)?)?;
    *chars = rest[n..].chars();
    Some(c)
}

/// `\u{1F600}` form, 1 to 6 hex digits.
fn braced_hex(chars: &mut Chars<'_>) -> Option<char> {
    let rest = chars.as_str();
    let close = rest.find('}')?;
    let digits = &rest[1..close];
    if digits.len() > 6 {
        return None;
    }
    let c = hex_value(digits)?;
    *chars = rest[close + 1..].chars();
    Some(c)
}

/// `\0` through `\377`: the first digit plus up to two more.
fn octal(first: char, chars: &mut Chars<'_>) -> Option<char> {
    let mut value = first.to_digit(8)?;
    for _ in 0..2 {
        match chars.as_str().chars().next().and_then(|c| c.to_digit(8)) {
            Some(d) => {
                value = value * 8 + d;
                chars.next();
            },
            None => break,
        }
    }
    if value > 0xff {
        return None;
    }
    char::from_u32(value)
}
