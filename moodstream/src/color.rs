//! Hex color helpers

/// RGB used when a color string cannot be parsed (a pale sky blue)
pub const FALLBACK_RGB: [u8; 3] = [230, 243, 255];

/// Parse `#RRGGBB` or `#RGB` (leading `#` optional)
pub fn parse_hex(color: &str) -> Option<[u8; 3]> {
    let hex = color.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    match hex.len() {
        6 => {
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some([channel(0)?, channel(2)?, channel(4)?])
        }
        3 => {
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 1], 16)
                    .ok()
                    .map(|v| v * 17)
            };
            Some([channel(0)?, channel(1)?, channel(2)?])
        }
        _ => None,
    }
}

/// Convert a hex color to RGB, falling back to [`FALLBACK_RGB`]
pub fn hex_to_rgb(color: &str) -> [u8; 3] {
    parse_hex(color).unwrap_or(FALLBACK_RGB)
}

/// Whether `color` is a `#RRGGBB` or `#RGB` string
pub fn is_hex_color(color: &str) -> bool {
    color.trim().starts_with('#') && parse_hex(color).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_and_short_forms() {
        assert_eq!(hex_to_rgb("#DC143C"), [220, 20, 60]);
        assert_eq!(hex_to_rgb("#fff"), [255, 255, 255]);
        assert_eq!(hex_to_rgb("228B22"), [34, 139, 34]);
    }

    #[test]
    fn test_invalid_falls_back() {
        assert_eq!(hex_to_rgb("not a color"), FALLBACK_RGB);
        assert_eq!(hex_to_rgb("#12345"), FALLBACK_RGB);
        assert!(!is_hex_color("FFD700"));
        assert!(is_hex_color("#FFD700"));
    }
}
