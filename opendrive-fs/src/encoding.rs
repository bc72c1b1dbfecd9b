//! Names the service refuses are stored with their reserved characters
//! swapped for full-width look-alikes, and swapped back when read.
//!
//! A look-alike that is already part of a local name is stored behind
//! [`QUOTE`] so it survives the trip back unchanged. The quote character
//! quotes itself the same way.

const CHAR_MAP: [(char, char); 8] = [
    ('\\', '\u{FF3C}'), // FULLWIDTH REVERSE SOLIDUS
    (':', '\u{FF1A}'),  // FULLWIDTH COLON
    ('*', '\u{FF0A}'),  // FULLWIDTH ASTERISK
    ('?', '\u{FF1F}'),  // FULLWIDTH QUESTION MARK
    ('"', '\u{FF02}'),  // FULLWIDTH QUOTATION MARK
    ('<', '\u{FF1C}'),  // FULLWIDTH LESS-THAN SIGN
    ('>', '\u{FF1E}'),  // FULLWIDTH GREATER-THAN SIGN
    ('|', '\u{FF5C}'),  // FULLWIDTH VERTICAL LINE
];

/// SINGLE HIGH-REVERSED-9 QUOTATION MARK
const QUOTE: char = '\u{201B}';

fn look_alike(c: char) -> Option<char> {
    CHAR_MAP
        .iter()
        .find(|(reserved, _)| *reserved == c)
        .map(|(_, safe)| *safe)
}

fn reserved(c: char) -> Option<char> {
    CHAR_MAP
        .iter()
        .find(|(_, safe)| *safe == c)
        .map(|(reserved, _)| *reserved)
}

fn needs_quote(c: char) -> bool {
    c == QUOTE || reserved(c).is_some()
}

/// Rewrites a local name into the form sent to the service.
pub fn replace_reserved_chars(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if needs_quote(c) {
            out.push(QUOTE);
            out.push(c);
        } else {
            out.push(look_alike(c).unwrap_or(c));
        }
    }
    out
}

/// Inverse of [`replace_reserved_chars`] for names read back from listings.
///
/// A stray quote not followed by a quotable character is kept as is.
pub fn restore_reserved_chars(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == QUOTE {
            match chars.peek() {
                Some(&next) if needs_quote(next) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(reserved(c).unwrap_or(c));
        }
    }
    out
}
