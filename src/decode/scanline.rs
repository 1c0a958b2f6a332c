//! Shared run-length scanning for linear symbologies.

use image::GrayImage;

use super::BarcodeResult;

const MIN_CONTRAST: u8 = 48;

/// One run of equal-colored pixels along a scanline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Run {
    pub dark: bool,
    pub width: u32,
}

/// Binarize a row at its mid-range into runs. `None` for rows without enough contrast.
pub(crate) fn binarize_row(row: &[u8]) -> Option<Vec<Run>> {
    let (min, max) = row
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max.saturating_sub(min) < MIN_CONTRAST {
        return None;
    }
    let threshold = ((min as u16 + max as u16) / 2) as u8;

    let mut runs: Vec<Run> = Vec::new();
    for &value in row {
        let dark = value < threshold;
        match runs.last_mut() {
            Some(run) if run.dark == dark => run.width += 1,
            _ => runs.push(Run { dark, width: 1 }),
        }
    }
    Some(runs)
}

/// `lines` rows spread evenly over `height`, deduplicated.
pub(crate) fn scan_rows(height: u32, lines: u32) -> Vec<u32> {
    let mut rows: Vec<u32> = (1..=lines)
        .map(|k| (k as u64 * height as u64 / (lines as u64 + 1)) as u32)
        .collect();
    rows.dedup();
    rows
}

/// Run `decode` over each scan row, forwards and backwards, collecting distinct symbols in
/// the order they are first read.
pub(crate) fn scan_symbols<F>(gray: &GrayImage, lines: u32, decode: F) -> Vec<BarcodeResult>
where
    F: Fn(&[Run]) -> Option<BarcodeResult>,
{
    let (width, height) = gray.dimensions();
    let mut symbols = Vec::new();
    if width == 0 || height == 0 {
        return symbols;
    }

    for y in scan_rows(height, lines) {
        let row: Vec<u8> = (0..width).map(|x| gray.get_pixel(x, y)[0]).collect();
        let Some(runs) = binarize_row(&row) else {
            continue;
        };
        let reversed: Vec<Run> = runs.iter().rev().copied().collect();
        for candidate in [&runs, &reversed] {
            if let Some(symbol) = decode(candidate) {
                if !symbols.contains(&symbol) {
                    symbols.push(symbol);
                }
            }
        }
    }
    symbols
}

/// Starting indices of every dark run.
pub(crate) fn bar_starts(runs: &[Run]) -> impl Iterator<Item = usize> + '_ {
    (0..runs.len()).filter(move |&start| runs[start].dark)
}

/// Whether the light run before `start` is at least `min_width` wide. A symbol touching
/// the row edge passes.
pub(crate) fn quiet_before(runs: &[Run], start: usize, min_width: f32) -> bool {
    start
        .checked_sub(1)
        .and_then(|i| runs.get(i))
        .map_or(true, |run| run.width as f32 >= min_width)
}

/// Whether the run at `end` (the first run past the symbol) is at least `min_width` wide.
pub(crate) fn quiet_after(runs: &[Run], end: usize, min_width: f32) -> bool {
    runs.get(end)
        .map_or(true, |run| run.width as f32 >= min_width)
}

/// Run widths from `start` to the end of the row.
pub(crate) fn widths_from(runs: &[Run], start: usize) -> Vec<f32> {
    runs[start..].iter().map(|run| run.width as f32).collect()
}
