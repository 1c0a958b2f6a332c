use anyhow::Result;
use image::GrayImage;

use super::scanline::{self, Run};
use super::{BarcodeResult, SymbolReader, Symbology};

const ALPHABET: &[u8; 44] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-. $/+%*";

/// Wide-element flags of each character in `ALPHABET`, first element (a bar) in bit 8.
const ENCODINGS: [u16; 44] = [
    0x034, 0x121, 0x061, 0x160, 0x031, 0x130, 0x070, 0x025, 0x124, 0x064, // 0-9
    0x109, 0x049, 0x148, 0x019, 0x118, 0x058, 0x00D, 0x10C, 0x04C, 0x01C, // A-J
    0x103, 0x043, 0x142, 0x013, 0x112, 0x052, 0x007, 0x106, 0x046, 0x016, // K-T
    0x181, 0x0C1, 0x1C0, 0x091, 0x190, 0x0D0, // U-Z
    0x085, 0x184, 0x0C4, 0x0A8, 0x0A2, 0x08A, 0x02A, // - . space $ / + %
    0x094, // *
];

const GUARD: char = '*';
const CHAR_RUNS: usize = 9;
const DEFAULT_SCAN_LINES: u32 = 15;
/// Narrowest wide element relative to the widest narrow one.
const MIN_WIDE_RATIO: f32 = 1.5;
/// Widest wide element relative to the narrowest wide one.
const MAX_WIDE_SPREAD: f32 = 2.0;
/// Inter-character gap limit, in narrow widths.
const MAX_GAP_NARROW: f32 = 4.0;
const MIN_QUIET_NARROW: f32 = 5.0;

/// Scanline reader for Code 39. Payloads exclude the `*` guards; no check character is
/// required or stripped.
#[derive(Clone, Copy, Debug)]
pub struct Code39Reader {
    scan_lines: u32,
}

impl Code39Reader {
    pub fn with_scan_lines(scan_lines: u32) -> Self {
        Self {
            scan_lines: scan_lines.max(1),
        }
    }
}

impl Default for Code39Reader {
    fn default() -> Self {
        Self::with_scan_lines(DEFAULT_SCAN_LINES)
    }
}

impl SymbolReader for Code39Reader {
    fn name(&self) -> &'static str {
        "code39"
    }

    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
        Ok(scanline::scan_symbols(gray, self.scan_lines, decode_runs))
    }
}

fn decode_runs(runs: &[Run]) -> Option<BarcodeResult> {
    scanline::bar_starts(runs)
        .find_map(|start| decode_at(runs, start))
        .map(|payload| BarcodeResult::new(payload, Symbology::Code39))
}

fn decode_at(runs: &[Run], start: usize) -> Option<String> {
    let widths = scanline::widths_from(runs, start);
    let (first, narrow) = classify(widths.get(0..CHAR_RUNS)?)?;
    if first != GUARD || !scanline::quiet_before(runs, start, MIN_QUIET_NARROW * narrow) {
        return None;
    }

    let mut text = String::new();
    let mut pos = 0;
    loop {
        let gap = *widths.get(pos + CHAR_RUNS)?;
        pos += CHAR_RUNS + 1;
        let (ch, narrow) = classify(widths.get(pos..pos + CHAR_RUNS)?)?;
        if gap > MAX_GAP_NARROW * narrow {
            return None;
        }
        if ch == GUARD {
            let end = start + pos + CHAR_RUNS;
            if text.is_empty() || !scanline::quiet_after(runs, end, MIN_QUIET_NARROW * narrow) {
                return None;
            }
            return Some(text);
        }
        text.push(ch);
    }
}

/// Character and mean narrow width of nine runs, or `None` unless exactly three stand out
/// as wide.
fn classify(widths: &[f32]) -> Option<(char, f32)> {
    let mut sorted = widths.to_vec();
    sorted.sort_by(f32::total_cmp);
    let (max_narrow, min_wide, max_wide) = (sorted[5], sorted[6], sorted[8]);
    if min_wide < MIN_WIDE_RATIO * max_narrow || max_wide > MAX_WIDE_SPREAD * min_wide {
        return None;
    }

    let pattern = widths
        .iter()
        .fold(0u16, |bits, &w| (bits << 1) | u16::from(w >= min_wide));
    let index = ENCODINGS.iter().position(|&code| code == pattern)?;
    let narrow = sorted[..6].iter().sum::<f32>() / 6.0;
    Some((char::from(ALPHABET[index]), narrow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const MODULE_PX: u32 = 2;
    const QUIET_MODULES: u32 = 12;

    /// Modules of `*payload*` with wide elements `wide` modules across.
    fn encode(payload: &str, wide: usize) -> Vec<bool> {
        let mut modules = Vec::new();
        for (i, ch) in format!("*{}*", payload).bytes().enumerate() {
            if i > 0 {
                modules.push(false);
            }
            let index = ALPHABET.iter().position(|&c| c == ch).unwrap();
            let code = ENCODINGS[index];
            for element in 0..CHAR_RUNS {
                let is_wide = code >> (CHAR_RUNS - 1 - element) & 1 == 1;
                let dark = element % 2 == 0;
                modules.extend(std::iter::repeat(dark).take(if is_wide { wide } else { 1 }));
            }
        }
        modules
    }

    fn render(modules: &[bool], flip: bool) -> GrayImage {
        let total = modules.len() as u32 + 2 * QUIET_MODULES;
        GrayImage::from_fn(total * MODULE_PX, 20, |x, _| {
            let mut module = x / MODULE_PX;
            if flip {
                module = total - 1 - module;
            }
            let dark = module >= QUIET_MODULES
                && modules
                    .get((module - QUIET_MODULES) as usize)
                    .copied()
                    .unwrap_or(false);
            Luma([if dark { 30 } else { 225 }])
        })
    }

    fn read(image: &GrayImage) -> Vec<BarcodeResult> {
        Code39Reader::default().read(image).unwrap()
    }

    #[test]
    fn every_character_has_three_wide_elements() {
        for code in ENCODINGS {
            assert_eq!(code.count_ones(), 3, "{:#05x}", code);
        }
    }

    #[test]
    fn reads_code39_at_both_wide_ratios() {
        for wide in [2, 3] {
            assert_eq!(
                read(&render(&encode("PALLET-42", wide), false)),
                vec![BarcodeResult::new("PALLET-42", Symbology::Code39)]
            );
        }
    }

    #[test]
    fn reads_upside_down_code39() {
        assert_eq!(
            read(&render(&encode("A1 $/+%.", 3), true)),
            vec![BarcodeResult::new("A1 $/+%.", Symbology::Code39)]
        );
    }

    #[test]
    fn missing_stop_guard_is_rejected() {
        let mut modules = encode("ABC", 3);
        // Drop the trailing guard and its gap.
        modules.truncate(modules.len() - 16);
        assert!(read(&render(&modules, false)).is_empty());
    }
}
