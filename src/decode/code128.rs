use anyhow::Result;
use image::GrayImage;

use super::scanline::{self, Run};
use super::{BarcodeResult, SymbolReader, Symbology};

/// Bar/space widths, in modules, of every Code 128 symbol value. Each pattern starts with a
/// bar and spans 11 modules.
const PATTERNS: [[u8; 6]; 106] = [
    [2, 1, 2, 2, 2, 2],
    [2, 2, 2, 1, 2, 2],
    [2, 2, 2, 2, 2, 1],
    [1, 2, 1, 2, 2, 3],
    [1, 2, 1, 3, 2, 2],
    [1, 3, 1, 2, 2, 2],
    [1, 2, 2, 2, 1, 3],
    [1, 2, 2, 3, 1, 2],
    [1, 3, 2, 2, 1, 2],
    [2, 2, 1, 2, 1, 3],
    [2, 2, 1, 3, 1, 2],
    [2, 3, 1, 2, 1, 2],
    [1, 1, 2, 2, 3, 2],
    [1, 2, 2, 1, 3, 2],
    [1, 2, 2, 2, 3, 1],
    [1, 1, 3, 2, 2, 2],
    [1, 2, 3, 1, 2, 2],
    [1, 2, 3, 2, 2, 1],
    [2, 2, 3, 2, 1, 1],
    [2, 2, 1, 1, 3, 2],
    [2, 2, 1, 2, 3, 1],
    [2, 1, 3, 2, 1, 2],
    [2, 2, 3, 1, 1, 2],
    [3, 1, 2, 1, 3, 1],
    [3, 1, 1, 2, 2, 2],
    [3, 2, 1, 1, 2, 2],
    [3, 2, 1, 2, 2, 1],
    [3, 1, 2, 2, 1, 2],
    [3, 2, 2, 1, 1, 2],
    [3, 2, 2, 2, 1, 1],
    [2, 1, 2, 1, 2, 3],
    [2, 1, 2, 3, 2, 1],
    [2, 3, 2, 1, 2, 1],
    [1, 1, 1, 3, 2, 3],
    [1, 3, 1, 1, 2, 3],
    [1, 3, 1, 3, 2, 1],
    [1, 1, 2, 3, 1, 3],
    [1, 3, 2, 1, 1, 3],
    [1, 3, 2, 3, 1, 1],
    [2, 1, 1, 3, 1, 3],
    [2, 3, 1, 1, 1, 3],
    [2, 3, 1, 3, 1, 1],
    [1, 1, 2, 1, 3, 3],
    [1, 1, 2, 3, 3, 1],
    [1, 3, 2, 1, 3, 1],
    [1, 1, 3, 1, 2, 3],
    [1, 1, 3, 3, 2, 1],
    [1, 3, 3, 1, 2, 1],
    [3, 1, 3, 1, 2, 1],
    [2, 1, 1, 3, 3, 1],
    [2, 3, 1, 1, 3, 1],
    [2, 1, 3, 1, 1, 3],
    [2, 1, 3, 3, 1, 1],
    [2, 1, 3, 1, 3, 1],
    [3, 1, 1, 1, 2, 3],
    [3, 1, 1, 3, 2, 1],
    [3, 3, 1, 1, 2, 1],
    [3, 1, 2, 1, 1, 3],
    [3, 1, 2, 3, 1, 1],
    [3, 3, 2, 1, 1, 1],
    [3, 1, 4, 1, 1, 1],
    [2, 2, 1, 4, 1, 1],
    [4, 3, 1, 1, 1, 1],
    [1, 1, 1, 2, 2, 4],
    [1, 1, 1, 4, 2, 2],
    [1, 2, 1, 1, 2, 4],
    [1, 2, 1, 4, 2, 1],
    [1, 4, 1, 1, 2, 2],
    [1, 4, 1, 2, 2, 1],
    [1, 1, 2, 2, 1, 4],
    [1, 1, 2, 4, 1, 2],
    [1, 2, 2, 1, 1, 4],
    [1, 2, 2, 4, 1, 1],
    [1, 4, 2, 1, 1, 2],
    [1, 4, 2, 2, 1, 1],
    [2, 4, 1, 2, 1, 1],
    [2, 2, 1, 1, 1, 4],
    [4, 1, 3, 1, 1, 1],
    [2, 4, 1, 1, 1, 2],
    [1, 3, 4, 1, 1, 1],
    [1, 1, 1, 2, 4, 2],
    [1, 2, 1, 1, 4, 2],
    [1, 2, 1, 2, 4, 1],
    [1, 1, 4, 2, 1, 2],
    [1, 2, 4, 1, 1, 2],
    [1, 2, 4, 2, 1, 1],
    [4, 1, 1, 2, 1, 2],
    [4, 2, 1, 1, 1, 2],
    [4, 2, 1, 2, 1, 1],
    [2, 1, 2, 1, 4, 1],
    [2, 1, 4, 1, 2, 1],
    [4, 1, 2, 1, 2, 1],
    [1, 1, 1, 1, 4, 3],
    [1, 1, 1, 3, 4, 1],
    [1, 3, 1, 1, 4, 1],
    [1, 1, 4, 1, 1, 3],
    [1, 1, 4, 3, 1, 1],
    [4, 1, 1, 1, 1, 3],
    [4, 1, 1, 3, 1, 1],
    [1, 1, 3, 1, 4, 1],
    [1, 1, 4, 1, 3, 1],
    [3, 1, 1, 1, 4, 1],
    [4, 1, 1, 1, 3, 1],
    [2, 1, 1, 4, 1, 2],
    [2, 1, 1, 2, 1, 4],
    [2, 1, 1, 2, 3, 2],
];

const STOP: [u8; 7] = [2, 3, 3, 1, 1, 1, 2];

const SHIFT: usize = 98;
const CODE_C: usize = 99;
const CODE_B_OR_FNC4: usize = 100;
const CODE_A_OR_FNC4: usize = 101;
const FNC1: usize = 102;
const START_A: usize = 103;
const START_B: usize = 104;
const START_C: usize = 105;

const DEFAULT_SCAN_LINES: u32 = 15;
/// Summed deviation, in modules, tolerated between a symbol's runs and its pattern.
const MAX_SYMBOL_ERROR: f32 = 1.6;
const MIN_QUIET_MODULES: f32 = 5.0;
/// GS1 group separator emitted for FNC1 after the first position.
const GROUP_SEPARATOR: char = '\u{1d}';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CodeSet {
    A,
    B,
    C,
}

impl CodeSet {
    fn shifted(self) -> Self {
        match self {
            CodeSet::A => CodeSet::B,
            CodeSet::B => CodeSet::A,
            CodeSet::C => CodeSet::C,
        }
    }
}

/// Scanline reader for Code 128 (sets A, B and C, with shift and FNC1).
#[derive(Clone, Copy, Debug)]
pub struct Code128Reader {
    scan_lines: u32,
}

impl Code128Reader {
    pub fn with_scan_lines(scan_lines: u32) -> Self {
        Self {
            scan_lines: scan_lines.max(1),
        }
    }
}

impl Default for Code128Reader {
    fn default() -> Self {
        Self::with_scan_lines(DEFAULT_SCAN_LINES)
    }
}

impl SymbolReader for Code128Reader {
    fn name(&self) -> &'static str {
        "code128"
    }

    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
        Ok(scanline::scan_symbols(gray, self.scan_lines, decode_runs))
    }
}

fn decode_runs(runs: &[Run]) -> Option<BarcodeResult> {
    scanline::bar_starts(runs)
        .find_map(|start| decode_at(runs, start))
        .map(|payload| BarcodeResult::new(payload, Symbology::Code128))
}

fn decode_at(runs: &[Run], start: usize) -> Option<String> {
    let widths = scanline::widths_from(runs, start);
    let first = widths.get(0..6)?;
    let start_value = match_value(first)?;
    if !(START_A..=START_C).contains(&start_value) {
        return None;
    }
    let module = first.iter().sum::<f32>() / 11.0;
    if !scanline::quiet_before(runs, start, MIN_QUIET_MODULES * module) {
        return None;
    }

    let mut values = vec![start_value];
    let mut pos = 6;
    loop {
        if let Some(stop) = widths.get(pos..pos + STOP.len()) {
            let quiet = MIN_QUIET_MODULES * stop.iter().sum::<f32>() / 13.0;
            if pattern_error(stop, &STOP) <= MAX_SYMBOL_ERROR
                && scanline::quiet_after(runs, start + pos + STOP.len(), quiet)
            {
                break;
            }
        }
        let value = match_value(widths.get(pos..pos + 6)?)?;
        if value >= START_A {
            return None;
        }
        values.push(value);
        pos += 6;
    }

    // Start, at least one data value, check value.
    if values.len() < 3 {
        return None;
    }
    let check = values.pop()?;
    if checksum(&values) != check {
        return None;
    }
    decode_values(&values)
}

/// Weighted sum of start and data values modulo 103; the start value has weight 1.
fn checksum(values: &[usize]) -> usize {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| v * i.max(1))
        .sum::<usize>()
        % 103
}

fn pattern_error(widths: &[f32], pattern: &[u8]) -> f32 {
    let modules: f32 = pattern.iter().map(|&m| m as f32).sum();
    let scale = modules / widths.iter().sum::<f32>();
    widths
        .iter()
        .zip(pattern)
        .map(|(&w, &p)| (w * scale - p as f32).abs())
        .sum()
}

fn match_value(widths: &[f32]) -> Option<usize> {
    PATTERNS
        .iter()
        .enumerate()
        .map(|(value, pattern)| (value, pattern_error(widths, pattern)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|&(_, error)| error <= MAX_SYMBOL_ERROR)
        .map(|(value, _)| value)
}

/// Translate start and data values (check value removed) into text.
fn decode_values(values: &[usize]) -> Option<String> {
    let mut set = match values.first()? {
        &START_A => CodeSet::A,
        &START_B => CodeSet::B,
        _ => CodeSet::C,
    };
    let mut text = String::new();
    let mut shift = false;
    let mut fnc4 = false;

    for (index, &value) in values.iter().enumerate().skip(1) {
        let current = if shift { set.shifted() } else { set };
        shift = false;

        if value == FNC1 {
            if index > 1 {
                text.push(GROUP_SEPARATOR);
            }
            continue;
        }
        match current {
            CodeSet::C => match value {
                0..=99 => {
                    text.push(char::from(b'0' + (value / 10) as u8));
                    text.push(char::from(b'0' + (value % 10) as u8));
                }
                CODE_B_OR_FNC4 => set = CodeSet::B,
                CODE_A_OR_FNC4 => set = CodeSet::A,
                _ => return None,
            },
            CodeSet::A | CodeSet::B => match value {
                0..=95 => {
                    let ascii = if current == CodeSet::A && value >= 64 {
                        value - 64
                    } else {
                        value + 32
                    };
                    let code = if fnc4 { ascii + 128 } else { ascii };
                    fnc4 = false;
                    text.push(char::from(code as u8));
                }
                // FNC3 and FNC2 carry no text.
                96 | 97 => {}
                SHIFT => shift = true,
                CODE_C => set = CodeSet::C,
                CODE_B_OR_FNC4 if current == CodeSet::A => set = CodeSet::B,
                CODE_A_OR_FNC4 if current == CodeSet::B => set = CodeSet::A,
                CODE_B_OR_FNC4 | CODE_A_OR_FNC4 => fnc4 = true,
                _ => return None,
            },
        }
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barcoders::sym::code128::Code128;
    use image::Luma;

    const MODULE_PX: u32 = 3;
    const QUIET_MODULES: u32 = 12;

    fn render(modules: &[bool], flip: bool) -> GrayImage {
        let total = modules.len() as u32 + 2 * QUIET_MODULES;
        GrayImage::from_fn(total * MODULE_PX, 30, |x, _| {
            let mut module = x / MODULE_PX;
            if flip {
                module = total - 1 - module;
            }
            let dark = module >= QUIET_MODULES
                && modules
                    .get((module - QUIET_MODULES) as usize)
                    .copied()
                    .unwrap_or(false);
            Luma([if dark { 15 } else { 240 }])
        })
    }

    fn push_pattern(modules: &mut Vec<bool>, pattern: &[u8]) {
        let mut dark = true;
        for &w in pattern {
            modules.extend(std::iter::repeat(dark).take(w as usize));
            dark = !dark;
        }
    }

    /// Modules for start and data values, with the check value and stop appended.
    fn encode_values(values: &[usize], corrupt_check: bool) -> Vec<bool> {
        let mut check = checksum(values);
        if corrupt_check {
            check = (check + 1) % 103;
        }
        let mut modules = Vec::new();
        for &value in values.iter().chain(std::iter::once(&check)) {
            push_pattern(&mut modules, &PATTERNS[value]);
        }
        push_pattern(&mut modules, &STOP);
        modules
    }

    fn read(image: &GrayImage) -> Vec<BarcodeResult> {
        Code128Reader::default().read(image).unwrap()
    }

    #[test]
    fn patterns_span_eleven_modules_and_are_distinct() {
        for (value, pattern) in PATTERNS.iter().enumerate() {
            assert_eq!(pattern.iter().map(|&m| m as u32).sum::<u32>(), 11, "value {}", value);
            assert_eq!(PATTERNS.iter().filter(|p| *p == pattern).count(), 1);
        }
        assert_eq!(STOP.iter().map(|&m| m as u32).sum::<u32>(), 13);
    }

    #[test]
    fn reads_label_from_independent_encoder() {
        let modules: Vec<bool> = Code128::new("\u{181}ABC123")
            .unwrap()
            .encode()
            .into_iter()
            .map(|bit| bit == 1)
            .collect();
        assert_eq!(
            read(&render(&modules, false)),
            vec![BarcodeResult::new("ABC123", Symbology::Code128)]
        );
    }

    #[test]
    fn reads_set_c_digit_pairs() {
        let modules = encode_values(&[START_C, 12, 34, 56, 78], false);
        assert_eq!(
            read(&render(&modules, false)),
            vec![BarcodeResult::new("12345678", Symbology::Code128)]
        );
    }

    #[test]
    fn follows_code_set_switches() {
        // 'A' in set B, then digit pairs in set C.
        let modules = encode_values(&[START_B, 33, CODE_C, 12, 34], false);
        assert_eq!(
            read(&render(&modules, true)),
            vec![BarcodeResult::new("A1234", Symbology::Code128)]
        );
    }

    #[test]
    fn leading_fnc1_is_dropped() {
        let modules = encode_values(&[START_C, FNC1, 1, 23], false);
        assert_eq!(
            read(&render(&modules, false)),
            vec![BarcodeResult::new("0123", Symbology::Code128)]
        );
    }

    #[test]
    fn rejects_bad_check_value() {
        let modules = encode_values(&[START_B, 33, 34, 35], true);
        assert!(read(&render(&modules, false)).is_empty());
    }

    #[test]
    fn checksum_weights_start_once() {
        // 105 + 1*12 + 2*34 + 3*56 + 4*78 = 665 = 6*103 + 47
        assert_eq!(checksum(&[START_C, 12, 34, 56, 78]), 47);
    }
}
