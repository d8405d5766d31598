//! QR code rendering for the terminal.
//!
//! Renders with Unicode half-block characters — two QR rows per terminal
//! row — which yields a roughly square code since terminal cells are about
//! twice as tall as wide.

use qrcode::{Color, EcLevel, QrCode};

/// Render `data` as terminal lines that fit within the given dimensions.
///
/// Error correction is lowered step by step until the code fits; when even
/// the lowest level is too large a short human-readable message is returned
/// instead of the code.
#[must_use]
pub fn generate_qr_lines(data: &str, max_width: u16, max_height: u16) -> Vec<String> {
    let ec_levels = [EcLevel::M, EcLevel::L];

    for ec_level in ec_levels {
        let Ok(code) = QrCode::with_error_correction_level(data, ec_level) else {
            continue;
        };

        let colors = code.to_colors();
        let size = code.width();
        // Standard 2-module quiet zone on every side
        let quiet_zone = 2;
        let total = size + quiet_zone * 2;

        let qr_width = total as u16;
        let qr_height = total.div_ceil(2) as u16;
        if qr_width > max_width || qr_height > max_height {
            continue;
        }

        let dark_at = |x: usize, y: usize| -> bool {
            if x < quiet_zone || y < quiet_zone {
                return false;
            }
            let (qx, qy) = (x - quiet_zone, y - quiet_zone);
            if qx >= size || qy >= size {
                return false;
            }
            colors[qy * size + qx] == Color::Dark
        };

        let mut lines = Vec::with_capacity(qr_height as usize);
        for row_pair in 0..total.div_ceil(2) {
            let upper_y = row_pair * 2;
            let lower_y = upper_y + 1;
            let mut line = String::with_capacity(total);
            for x in 0..total {
                let upper = dark_at(x, upper_y);
                let lower = lower_y < total && dark_at(x, lower_y);
                line.push(match (upper, lower) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            lines.push(line);
        }
        return lines;
    }

    vec![
        "Terminal too small for QR code".to_string(),
        format!("Available: {max_width}x{max_height}"),
        "Resize the terminal and run //qr again".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_renders() {
        let lines = generate_qr_lines("hello", 100, 60);
        assert!(!lines.is_empty());
        assert!(!lines[0].contains("too small"));
        let joined = lines.join("");
        assert!(joined.contains('█') || joined.contains('▀') || joined.contains('▄'));
    }

    #[test]
    fn test_lines_are_uniform_width() {
        let lines = generate_qr_lines("https://example.com/pairing", 120, 60);
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn test_tiny_terminal_degrades_to_message() {
        let lines = generate_qr_lines("some pairing payload", 10, 4);
        assert!(lines[0].contains("too small"));
    }
}
