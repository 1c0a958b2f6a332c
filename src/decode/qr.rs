use anyhow::Result;
use image::GrayImage;

use super::{BarcodeResult, SymbolReader, Symbology};

/// QR recognition backed by `rqrr`.
///
/// Grids that are located but fail error correction are skipped, not reported as errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct QrReader;

impl SymbolReader for QrReader {
    fn name(&self) -> &'static str {
        "qr"
    }

    fn read(&self, gray: &GrayImage) -> Result<Vec<BarcodeResult>> {
        let (width, height) = gray.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                gray.get_pixel(x as u32, y as u32)[0]
            });

        let mut symbols = Vec::new();
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) => symbols.push(BarcodeResult::new(content, Symbology::QrCode)),
                Err(err) => log::debug!("qr grid located but not decodable: {:?}", err),
            }
        }
        Ok(symbols)
    }
}
