use std::path::Path;

use crate::{MemoryError, Result};

/// Parse a memory image with one hex byte per line. Blank lines are skipped.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line, text)| {
            u8::from_str_radix(text, 16).map_err(|_| MemoryError::BadHexLine {
                line,
                text: text.to_owned(),
            })
        })
        .collect()
}

/// Load a memory image; `.hex` files are parsed as text, anything else is taken as raw bytes.
pub fn load_image(path: &Path) -> Result<Vec<u8>> {
    let is_hex = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));
    if is_hex {
        parse_hex(&std::fs::read_to_string(path)?)
    } else {
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lines_become_bytes() {
        assert_eq!(parse_hex("0a\n\nFF\n 7f \n").unwrap(), vec![0x0a, 0xff, 0x7f]);
    }

    #[test]
    fn bad_hex_line_is_reported_with_its_number() {
        let err = parse_hex("00\nzz\n").unwrap_err();
        assert!(matches!(err, MemoryError::BadHexLine { line: 2, .. }));
    }
}
