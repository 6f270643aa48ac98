use std::borrow::Cow;

/// Strip terminal control characters and ANSI escape sequences from text.
///
/// Catalog names come straight from a remote provider and end up in the
/// CLI output and in group keys, so anything that could drive a terminal
/// is removed:
/// - ASCII control chars except tab, newline and carriage return
/// - ANSI CSI sequences (`\x1b[` ... final byte 0x40-0x7E)
/// - ANSI OSC sequences (`\x1b]` ... BEL or `\x1b\\`)
/// - a bare ESC
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s.bytes().any(is_stripped_byte);
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&next) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\x07' {
                            break;
                        }
                        if next == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if c.is_ascii() && is_stripped_byte(c as u8) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_stripped_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Normalize a provider label: strip control characters, turn line breaks
/// and tabs into spaces, and trim the ends.
pub fn clean_label(s: &str) -> String {
    let stripped = strip_control_chars(s);
    let flattened: String = stripped
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    flattened.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_borrowed() {
        let out = strip_control_chars("EN | Action");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, "EN | Action");
    }

    #[test]
    fn test_strips_csi_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m News"), "Red News");
    }

    #[test]
    fn test_strips_osc_sequences() {
        assert_eq!(
            strip_control_chars("\x1b]0;title\x07Sports"),
            "Sports"
        );
        assert_eq!(
            strip_control_chars("\x1b]8;;http://x\x1b\\Link"),
            "Link"
        );
    }

    #[test]
    fn test_strips_bare_control_bytes() {
        assert_eq!(strip_control_chars("A\x00B\x7fC\x08D"), "ABCD");
    }

    #[test]
    fn test_preserves_unicode() {
        assert_eq!(strip_control_chars("Ελληνικά\x01 | Δράμα"), "Ελληνικά | Δράμα");
    }

    #[test]
    fn test_clean_label_trims_and_flattens() {
        assert_eq!(clean_label("  FR |\tComédie\n"), "FR | Comédie");
        assert_eq!(clean_label("\x1b[1m   \x1b[0m"), "");
    }
}
