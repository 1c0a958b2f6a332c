use anyhow::Result;
use image::GrayImage;

use super::scanline::{self, Run};
use super::{BarcodeResult, SymbolReader, Symbology};

/// Module widths (space, bar, space, bar) of the odd-parity left-hand digits.
///
/// Right-hand digits use the same widths starting with a bar; even-parity left digits
/// use them reversed.
const DIGIT_WIDTHS: [[u8; 4]; 10] = [
    [3, 2, 1, 1],
    [2, 2, 2, 1],
    [2, 1, 2, 2],
    [1, 4, 1, 1],
    [1, 1, 3, 2],
    [1, 2, 3, 1],
    [1, 1, 1, 4],
    [1, 3, 1, 2],
    [1, 2, 1, 3],
    [3, 1, 1, 2],
];

/// Even-parity pattern of the six EAN-13 left digits, indexed by the implied leading digit.
/// Bit 5 is the leftmost digit.
const FIRST_DIGIT_PARITY: [u8; 10] = [
    0b000000, 0b001011, 0b001101, 0b001110, 0b010011, 0b011001, 0b011100, 0b010101, 0b010110,
    0b011010,
];

const DEFAULT_SCAN_LINES: u32 = 15;
/// Summed deviation, in modules, tolerated between a digit's runs and its pattern.
const MAX_DIGIT_ERROR: f32 = 1.4;
const MIN_GUARD_RATIO: f32 = 0.5;
const MAX_GUARD_RATIO: f32 = 1.8;
const MIN_QUIET_MODULES: f32 = 2.0;

#[derive(Clone, Copy, Debug)]
struct Layout {
    symbology: Symbology,
    modules: usize,
    half_digits: usize,
    /// Runs from the first start-guard bar to the last end-guard bar.
    runs: usize,
    /// Whether left digits may use even parity (EAN-13 encodes its first digit that way).
    even_parity: bool,
}

impl Layout {
    fn middle_guard(&self) -> usize {
        3 + 4 * self.half_digits
    }

    fn end_guard(&self) -> usize {
        self.middle_guard() + 5 + 4 * self.half_digits
    }
}

const EAN13: Layout = Layout {
    symbology: Symbology::Ean13,
    modules: 95,
    half_digits: 6,
    runs: 59,
    even_parity: true,
};

const EAN8: Layout = Layout {
    symbology: Symbology::Ean8,
    modules: 67,
    half_digits: 4,
    runs: 43,
    even_parity: false,
};

/// Scanline reader for EAN-13 and EAN-8 linear symbols.
///
/// Rows spread evenly across the region are binarized at their mid-range and read in both
/// directions, so symbols rotated by 180 degrees are found too. A symbol is accepted only
/// when its guards line up and the check digit verifies.
#[derive(Clone, Copy, Debug)]
pub struct EanReader {
    scan_lines: u32,
}

impl EanReader {
    pub fn with_scan_lines(scan_lines: u32) -> Self {
        Self {
            scan_lines: scan_lines.max(1),
        }
    }
}

impl Default for EanReader {
    fn default() -> Self {
        Self::with_scan_lines(DEFAULT_SCAN_LINES)
    }
}

impl SymbolReader for EanReader {
    fn name(&self) -> &'static str {
        "ean"
    }

    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
        if (gray.width() as usize) < EAN8.modules {
            return Ok(Vec::new());
        }
        Ok(scanline::scan_symbols(gray, self.scan_lines, decode_runs))
    }
}

fn decode_runs(runs: &[Run]) -> Option<BarcodeResult> {
    scanline::bar_starts(runs).find_map(|start| {
        [EAN13, EAN8].iter().find_map(|layout| {
            decode_at(runs, start, layout)
                .map(|digits| BarcodeResult::new(digits, layout.symbology))
        })
    })
}

fn decode_at(runs: &[Run], start: usize, layout: &Layout) -> Option<String> {
    let window = runs.get(start..start + layout.runs)?;
    let widths: Vec<f32> = window.iter().map(|run| run.width as f32).collect();
    let module = widths.iter().sum::<f32>() / layout.modules as f32;

    let guard_ok = |from: usize, len: usize| {
        widths[from..from + len].iter().all(|&w| {
            let ratio = w / module;
            (MIN_GUARD_RATIO..=MAX_GUARD_RATIO).contains(&ratio)
        })
    };
    if !guard_ok(0, 3) || !guard_ok(layout.middle_guard(), 5) || !guard_ok(layout.end_guard(), 3)
    {
        return None;
    }

    let quiet = MIN_QUIET_MODULES * module;
    if !scanline::quiet_before(runs, start, quiet)
        || !scanline::quiet_after(runs, start + layout.runs, quiet)
    {
        return None;
    }

    let mut digits: Vec<u8> = Vec::with_capacity(layout.half_digits * 2 + 1);
    let mut parity = 0u8;
    for i in 0..layout.half_digits {
        let offset = 3 + 4 * i;
        let (digit, even) = match_left(&widths[offset..offset + 4], layout.even_parity)?;
        parity = (parity << 1) | even as u8;
        digits.push(digit);
    }
    for i in 0..layout.half_digits {
        let offset = layout.middle_guard() + 5 + 4 * i;
        let (digit, error) = match_digit(&widths[offset..offset + 4], false)?;
        if error > MAX_DIGIT_ERROR {
            return None;
        }
        digits.push(digit);
    }

    if layout.even_parity {
        let first = FIRST_DIGIT_PARITY.iter().position(|&p| p == parity)?;
        digits.insert(0, first as u8);
    }
    if !checksum_ok(&digits) {
        return None;
    }
    Some(digits.iter().map(|d| char::from(b'0' + d)).collect())
}

/// Best left-hand match as (digit, is_even_parity).
fn match_left(widths: &[f32], even_parity: bool) -> Option<(u8, bool)> {
    let (odd_digit, odd_error) = match_digit(widths, false)?;
    let (digit, even, error) = match even_parity.then(|| match_digit(widths, true)).flatten() {
        Some((even_digit, even_error)) if even_error < odd_error => (even_digit, true, even_error),
        _ => (odd_digit, false, odd_error),
    };
    (error <= MAX_DIGIT_ERROR).then_some((digit, even))
}

/// Closest digit pattern and its summed deviation in modules.
fn match_digit(widths: &[f32], reversed: bool) -> Option<(u8, f32)> {
    let total: f32 = widths.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let scale = 7.0 / total;
    DIGIT_WIDTHS
        .iter()
        .enumerate()
        .map(|(digit, pattern)| {
            let error: f32 = (0..4)
                .map(|k| {
                    let expected = if reversed { pattern[3 - k] } else { pattern[k] };
                    (widths[k] * scale - expected as f32).abs()
                })
                .sum();
            (digit as u8, error)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Weights alternate 3,1,3... from the digit nearest the check digit.
fn checksum_ok(digits: &[u8]) -> bool {
    let Some((&check, body)) = digits.split_last() else {
        return false;
    };
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| d as u32 * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    (10 - sum % 10) % 10 == check as u32
}
