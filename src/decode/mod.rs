//! Barcode decoder: symbol recognition inside one cropped detection region.
//!
//! A region is converted to a single-channel intensity image and handed to each
//! [`SymbolReader`] in turn. The concatenation of reader outputs is the recognizer's native
//! ordering; [`BarcodeDecoder::decode`] reports only the first symbol of that ordering.
//!
//! Failures never escape a region: they become [`DecodeOutcome::Failed`], which the
//! pipeline reports exactly like an absent symbol.

mod code128;
mod code39;
mod ean;
mod itf;
mod qr;
mod scanline;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

pub use code128::Code128Reader;
pub use code39::Code39Reader;
pub use ean::EanReader;
pub use itf::ItfReader;
pub use qr::QrReader;

/// Barcode encoding standard of a recognized symbol.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Symbology {
    QrCode,
    Ean13,
    Ean8,
    Code128,
    Code39,
    /// Interleaved 2 of 5.
    Interleaved2of5,
}

impl Symbology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbology::QrCode => "QRCODE",
            Symbology::Ean13 => "EAN13",
            Symbology::Ean8 => "EAN8",
            Symbology::Code128 => "CODE128",
            Symbology::Code39 => "CODE39",
            Symbology::Interleaved2of5 => "I25",
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload and symbology of one recognized symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeResult {
    pub barcode_number: String,
    pub barcode_type: String,
}

impl BarcodeResult {
    pub fn new(payload: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            barcode_number: payload.into(),
            barcode_type: symbology.as_str().to_string(),
        }
    }
}

/// Result of decoding one region.
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded(BarcodeResult),
    /// Recognition ran and found nothing.
    Absent,
    /// Recognition could not run or faulted. Reported to clients as absent.
    Failed(anyhow::Error),
}

impl DecodeOutcome {
    pub fn into_result(self) -> Option<BarcodeResult> {
        match self {
            DecodeOutcome::Decoded(result) => Some(result),
            DecodeOutcome::Absent | DecodeOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DecodeOutcome::Failed(_))
    }
}

/// One symbology family's recognition pass over an intensity image.
pub trait SymbolReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return every symbol found, in reading order. Finding nothing is `Ok(vec![])`.
    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>>;
}

pub struct BarcodeDecoder {
    readers: Vec<Box<dyn SymbolReader>>,
}

impl BarcodeDecoder {
    /// QR first, then EAN-13/EAN-8, Code 128, Code 39 and Interleaved 2 of 5.
    pub fn new() -> Self {
        Self::with_readers(vec![
            Box::new(QrReader),
            Box::new(EanReader::default()),
            Box::new(Code128Reader::default()),
            Box::new(Code39Reader::default()),
            Box::new(ItfReader::default()),
        ])
    }

    pub fn with_readers(readers: Vec<Box<dyn SymbolReader>>) -> Self {
        Self { readers }
    }

    /// Decode a region, keeping only the first recognized symbol.
    pub fn decode(&self, region: &DynamicImage) -> DecodeOutcome {
        match self.scan(region, true) {
            Ok(symbols) => match symbols.into_iter().next() {
                Some(symbol) => DecodeOutcome::Decoded(symbol),
                None => DecodeOutcome::Absent,
            },
            Err(err) => DecodeOutcome::Failed(err),
        }
    }

    /// Every distinct symbol in the region, in native order.
    pub fn recognize_all(&self, region: &DynamicImage) -> Result<Vec<BarcodeResult>> {
        self.scan(region, false)
    }

    fn scan(&self, region: &DynamicImage, first_only: bool) -> Result<Vec<BarcodeResult>> {
        if region.width() == 0 || region.height() == 0 {
            return Err(anyhow!(
                "cannot decode an empty {}x{} region",
                region.width(),
                region.height()
            ));
        }
        let gray = to_intensity(region);

        let mut symbols: Vec<BarcodeResult> = Vec::new();
        let mut first_error = None;
        for reader in &self.readers {
            let found = panic::catch_unwind(AssertUnwindSafe(|| reader.read(&gray)))
                .unwrap_or_else(|_| Err(anyhow!("{} reader panicked", reader.name())));
            match found {
                Ok(found) => {
                    for symbol in found {
                        if !symbols.contains(&symbol) {
                            symbols.push(symbol);
                        }
                    }
                }
                Err(err) => {
                    log::debug!("{} reader failed: {:#}", reader.name(), err);
                    first_error.get_or_insert(err);
                }
            }
            if first_only && !symbols.is_empty() {
                break;
            }
        }

        match first_error {
            Some(err) if symbols.is_empty() => Err(err),
            _ => Ok(symbols),
        }
    }
}

impl Default for BarcodeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-channel intensity view of a region.
///
/// Y = (76*R + 150*G + 29*B) >> 8; single-channel input passes through unchanged.
pub fn to_intensity(region: &DynamicImage) -> GrayImage {
    match region {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageRgb8(rgb) => rgb_to_intensity(rgb),
        other => rgb_to_intensity(&other.to_rgb8()),
    }
}

fn rgb_to_intensity(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let y = (76 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8;
        Luma([y as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(&'static str, Vec<BarcodeResult>);

    impl SymbolReader for Scripted {
        fn name(&self) -> &'static str {
            self.0
        }

        fn read(&self, _gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
            Ok(self.1.clone())
        }
    }

    struct Faulty;

    impl SymbolReader for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn read(&self, _gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
            Err(anyhow!("corrupt region"))
        }
    }

    struct Panicky;

    impl SymbolReader for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn read(&self, _gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
            panic!("index out of bounds")
        }
    }

    fn region() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
    }

    #[test]
    fn intensity_uses_integer_weights() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, image::Rgb([255, 255, 255]));
        rgb.put_pixel(1, 0, image::Rgb([100, 0, 0]));
        let gray = to_intensity(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(gray.get_pixel(0, 0)[0], 254);
        assert_eq!(gray.get_pixel(1, 0)[0], 29);
    }

    #[test]
    fn first_symbol_wins() {
        let decoder = BarcodeDecoder::with_readers(vec![
            Box::new(Scripted(
                "a",
                vec![
                    BarcodeResult::new("first", Symbology::QrCode),
                    BarcodeResult::new("second", Symbology::QrCode),
                ],
            )),
            Box::new(Scripted("b", vec![BarcodeResult::new("96385074", Symbology::Ean8)])),
        ]);

        match decoder.decode(&region()) {
            DecodeOutcome::Decoded(result) => assert_eq!(result.barcode_number, "first"),
            other => panic!("expected a symbol, got {:?}", other),
        }

        let all = decoder.recognize_all(&region()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn symbology_names() {
        let names: Vec<&str> = [
            Symbology::QrCode,
            Symbology::Ean13,
            Symbology::Ean8,
            Symbology::Code128,
            Symbology::Code39,
            Symbology::Interleaved2of5,
        ]
        .iter()
        .map(Symbology::as_str)
        .collect();
        assert_eq!(names, ["QRCODE", "EAN13", "EAN8", "CODE128", "CODE39", "I25"]);
    }

    #[test]
    fn default_decoder_reads_code128_label() {
        const MODULE_PX: u32 = 3;
        const QUIET_MODULES: usize = 12;
        let modules = barcoders::sym::code128::Code128::new("\u{181}ABC123")
            .unwrap()
            .encode();
        let width = (modules.len() + 2 * QUIET_MODULES) as u32 * MODULE_PX;
        let label = RgbImage::from_fn(width, 60, |x, _| {
            let module = (x / MODULE_PX) as usize;
            let dark = module >= QUIET_MODULES && modules.get(module - QUIET_MODULES) == Some(&1);
            if dark {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });

        match BarcodeDecoder::new().decode(&DynamicImage::ImageRgb8(label)) {
            DecodeOutcome::Decoded(result) => {
                assert_eq!(result, BarcodeResult::new("ABC123", Symbology::Code128))
            }
            other => panic!("expected a Code 128 symbol, got {:?}", other),
        }
    }

    #[test]
    fn nothing_found_is_absent() {
        let decoder = BarcodeDecoder::with_readers(vec![Box::new(Scripted("a", vec![]))]);
        assert!(matches!(decoder.decode(&region()), DecodeOutcome::Absent));
    }

    #[test]
    fn empty_region_fails_without_panicking() {
        let decoder = BarcodeDecoder::new();
        let outcome = decoder.decode(&DynamicImage::ImageRgb8(RgbImage::new(0, 5)));
        assert!(outcome.is_failed());
        assert!(outcome.into_result().is_none());
    }

    #[test]
    fn reader_faults_are_contained() {
        let decoder = BarcodeDecoder::with_readers(vec![Box::new(Panicky), Box::new(Faulty)]);
        assert!(decoder.decode(&region()).is_failed());

        let decoder = BarcodeDecoder::with_readers(vec![
            Box::new(Faulty),
            Box::new(Scripted("ok", vec![BarcodeResult::new("A1", Symbology::QrCode)])),
        ]);
        assert!(matches!(decoder.decode(&region()), DecodeOutcome::Decoded(_)));
    }
}
