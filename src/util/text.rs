use std::borrow::Cow;

/// Collapses every run of whitespace (including newlines) into a single space
/// and trims both ends.
///
/// Used wherever two strings must compare equal regardless of incidental
/// layout, most importantly when computing advisory identity keys.
///
/// # Examples
///
/// ```
/// use advisory_feeds::util::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  Heavy \n\t rainfall  "), "Heavy rainfall");
/// assert_eq!(collapse_whitespace(""), "");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Normalizes multi-line text: collapses whitespace inside each line and drops
/// blank lines, so leading and trailing blank lines disappear as well.
///
/// Lines are joined with `\n`.
///
/// # Examples
///
/// ```
/// use advisory_feeds::util::normalize_lines;
///
/// let raw = "\n\n  Rainfall   Advisory No. 3 \n\n\n  Moderate  to heavy rains\n  ";
/// assert_eq!(normalize_lines(raw), "Rainfall Advisory No. 3\nModerate to heavy rains");
/// ```
pub fn normalize_lines(s: &str) -> String {
    s.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SEC-001: Strip control characters and ANSI escape sequences from scraped text.
///
/// Advisory text ends up inside published XML, where C0 control characters
/// are not allowed at all. Removes:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().any(|&b| is_stripped(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameter bytes up to and including the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: runs until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_stripped(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only stop on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_stripped(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_mixed_whitespace() {
        assert_eq!(
            collapse_whitespace("Rainfall\u{a0}Advisory \r\n No.  5"),
            "Rainfall Advisory No. 5"
        );
    }

    #[test]
    fn test_collapse_only_whitespace_is_empty() {
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }

    #[test]
    fn test_normalize_lines_keeps_line_structure() {
        let raw = "Line one\n   \nLine   two\r\n\tLine three";
        assert_eq!(normalize_lines(raw), "Line one\nLine two\nLine three");
    }

    #[test]
    fn test_normalize_lines_empty() {
        assert_eq!(normalize_lines("\n\n  \n"), "");
    }

    // ========================================================================
    // strip_control_chars tests
    // ========================================================================

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        let input = "Heavy rainfall expected over Samar.";
        let result = strip_control_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, input);
    }

    #[test]
    fn test_strip_preserves_tabs_newlines_cr() {
        let input = "line1\nline2\ttabbed\r\nwindows";
        let result = strip_control_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, input);
    }

    #[test]
    fn test_strip_control_chars_removes_controls() {
        let input = "ra\x00in\x07fa\x08ll\x0b \x0cwarn\x01ing";
        assert_eq!(strip_control_chars(input), "rainfall warning");
    }

    #[test]
    fn test_strip_ansi_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(
            strip_control_chars("\x1b]0;title\x07safe \x1b]0;t\x1b\\text"),
            "safe text"
        );
        assert_eq!(strip_control_chars("before\x1bafter"), "beforeafter");
    }

    #[test]
    fn test_strip_unicode_preserved() {
        let input = "Ulan \x1b[1mmalakas\x1b[0m sa Visayas";
        assert_eq!(strip_control_chars(input), "Ulan malakas sa Visayas");
    }
}
