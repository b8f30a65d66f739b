use std::fmt::{self, Write};

/// A line read from the port, ready to print.
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    /// Valid UTF-8, trailing whitespace (including the terminator) removed.
    Text(String),
    /// Anything that isn't UTF-8, as lowercase hex of the raw bytes.
    Hex(String),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Text(text) => write!(f, "Received: {text}"),
            Line::Hex(hex) => write!(f, "Received (hex): {hex}"),
        }
    }
}

/// Decodes one line of raw port output. Returns None for lines with nothing
/// worth printing (empty, or only whitespace).
pub fn render(bytes: &[u8]) -> Option<Line> {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let text = text.trim_end();
            if text.is_empty() {
                None
            } else {
                Some(Line::Text(text.to_string()))
            }
        }
        Err(_) => Some(Line::Hex(to_hex(bytes))),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String can't fail.
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a [u8],
            expected_result: Option<Line>,
        }
        let tests = [
            TestCase {
                name: "crlf terminated",
                input: b"Hello from Teensy!\r\n",
                expected_result: Some(Line::Text("Hello from Teensy!".to_string())),
            },
            TestCase {
                name: "unterminated",
                input: b"partial",
                expected_result: Some(Line::Text("partial".to_string())),
            },
            TestCase {
                name: "leading whitespace kept",
                input: b"  indented\n",
                expected_result: Some(Line::Text("  indented".to_string())),
            },
            TestCase {
                name: "multibyte utf8",
                input: "temp: 21.5\u{b0}C\n".as_bytes(),
                expected_result: Some(Line::Text("temp: 21.5\u{b0}C".to_string())),
            },
            TestCase {
                name: "empty",
                input: b"",
                expected_result: None,
            },
            TestCase {
                name: "bare terminator",
                input: b"\r\n",
                expected_result: None,
            },
            TestCase {
                name: "invalid utf8",
                input: &[0xff, 0xfe],
                expected_result: Some(Line::Hex("fffe".to_string())),
            },
            TestCase {
                name: "invalid utf8 keeps terminator",
                input: &[0x01, 0x80, 0x0a],
                expected_result: Some(Line::Hex("01800a".to_string())),
            },
            TestCase {
                name: "truncated multibyte sequence",
                input: &[b'a', 0xc3],
                expected_result: Some(Line::Hex("61c3".to_string())),
            },
        ];
        for test in tests {
            assert_eq!(render(test.input), test.expected_result, "{0}", test.name);
        }
    }

    #[test]
    fn test_hex_covers_every_byte_value() {
        let bytes: Vec<u8> = (0..=255).collect();
        let Some(Line::Hex(hex)) = render(&bytes) else {
            panic!("0x80..=0xff is not utf8");
        };
        assert_eq!(hex.len(), 512);
        assert!(hex.starts_with("000102"));
        assert!(hex.ends_with("fdfeff"));
    }

    #[test]
    fn test_display_distinguishes_hex() {
        assert_eq!(
            Line::Text("ok".to_string()).to_string(),
            "Received: ok".to_string()
        );
        assert_eq!(
            Line::Hex("fffe".to_string()).to_string(),
            "Received (hex): fffe".to_string()
        );
    }
}
