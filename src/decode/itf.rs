use anyhow::Result;
use image::GrayImage;

use super::scanline::{self, Run};
use super::{BarcodeResult, SymbolReader, Symbology};

/// Wide-element flags of digits 0-9 across their five elements, first element in bit 4.
const DIGIT_PATTERNS: [u8; 10] = [
    0b00110, 0b10001, 0b01001, 0b11000, 0b00101, 0b10100, 0b01100, 0b00011, 0b10010, 0b01010,
];

const DEFAULT_SCAN_LINES: u32 = 15;
/// Shortest payload accepted. Short interleaved runs are too easily matched inside other
/// symbols.
const MIN_DIGITS: usize = 6;
/// Any start-guard element this far above the guard mean is not narrow.
const MAX_NARROW_RATIO: f32 = 1.5;
const MIN_WIDE_RATIO: f32 = 1.5;
const MIN_QUIET_NARROW: f32 = 10.0;

/// Scanline reader for Interleaved 2 of 5: digit pairs, the first carried by bars and the
/// second by spaces. No check digit is required or stripped.
#[derive(Clone, Copy, Debug)]
pub struct ItfReader {
    scan_lines: u32,
}

impl ItfReader {
    pub fn with_scan_lines(scan_lines: u32) -> Self {
        Self {
            scan_lines: scan_lines.max(1),
        }
    }
}

impl Default for ItfReader {
    fn default() -> Self {
        Self::with_scan_lines(DEFAULT_SCAN_LINES)
    }
}

impl SymbolReader for ItfReader {
    fn name(&self) -> &'static str {
        "i25"
    }

    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
        Ok(scanline::scan_symbols(gray, self.scan_lines, decode_runs))
    }
}

fn decode_runs(runs: &[Run]) -> Option<BarcodeResult> {
    scanline::bar_starts(runs)
        .find_map(|start| decode_at(runs, start))
        .map(|payload| BarcodeResult::new(payload, Symbology::Interleaved2of5))
}

fn decode_at(runs: &[Run], start: usize) -> Option<String> {
    let widths = scanline::widths_from(runs, start);
    let guard = widths.get(0..4)?;
    let narrow = guard.iter().sum::<f32>() / 4.0;
    if guard.iter().any(|&w| w > MAX_NARROW_RATIO * narrow)
        || !scanline::quiet_before(runs, start, MIN_QUIET_NARROW * narrow)
    {
        return None;
    }

    let mut digits = String::new();
    let mut pos = 4;
    loop {
        if is_stop(&widths, pos, narrow)
            && scanline::quiet_after(runs, start + pos + 3, MIN_QUIET_NARROW * narrow)
        {
            break;
        }
        let pair = widths.get(pos..pos + 10)?;
        let bars: Vec<f32> = pair.iter().step_by(2).copied().collect();
        let spaces: Vec<f32> = pair.iter().skip(1).step_by(2).copied().collect();
        digits.push(classify(&bars)?);
        digits.push(classify(&spaces)?);
        pos += 10;
    }

    (digits.len() >= MIN_DIGITS).then_some(digits)
}

/// Wide bar, narrow space, narrow bar.
fn is_stop(widths: &[f32], pos: usize, narrow: f32) -> bool {
    let wide = MIN_WIDE_RATIO * narrow;
    matches!(
        widths.get(pos..pos + 3),
        Some(&[bar, space, last]) if bar >= wide && space < wide && last < wide
    )
}

/// Digit for five elements with exactly two wide.
fn classify(group: &[f32]) -> Option<char> {
    let mut sorted = group.to_vec();
    sorted.sort_by(f32::total_cmp);
    let (max_narrow, min_wide) = (sorted[2], sorted[3]);
    if min_wide < MIN_WIDE_RATIO * max_narrow {
        return None;
    }
    let pattern = group
        .iter()
        .fold(0u8, |bits, &w| (bits << 1) | u8::from(w >= min_wide));
    let digit = DIGIT_PATTERNS.iter().position(|&p| p == pattern)?;
    Some(char::from(b'0' + digit as u8))
}
