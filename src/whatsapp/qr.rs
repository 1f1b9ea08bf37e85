//! Login code rendering.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::render::unicode;
use qrcode::QrCode;

use super::WhatsAppError;

/// Smallest edge of the rendered PNG in pixels.
const MIN_IMAGE_SIZE: u32 = 256;

/// Render a login code as a `data:image/png;base64,...` URL.
///
/// # Errors
///
/// Returns [`WhatsAppError::QrRender`] if the code does not fit in a QR
/// symbol or PNG encoding fails.
pub fn render_data_url(code: &str) -> Result<String, WhatsAppError> {
    let qr = encode(code)?;
    let image = qr
        .render::<Luma<u8>>()
        .min_dimensions(MIN_IMAGE_SIZE, MIN_IMAGE_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| WhatsAppError::QrRender(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}

/// Render a login code as block characters for a terminal.
///
/// # Errors
///
/// Returns [`WhatsAppError::QrRender`] if the code does not fit in a QR symbol.
pub fn render_terminal(code: &str) -> Result<String, WhatsAppError> {
    let qr = encode(code)?;
    Ok(qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

fn encode(code: &str) -> Result<QrCode, WhatsAppError> {
    QrCode::new(code.as_bytes()).map_err(|e| WhatsAppError::QrRender(e.to_string()))
}
