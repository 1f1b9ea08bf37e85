//! Login code rendering.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use guardian_relay::whatsapp::qr::{render_data_url, render_terminal};

const CODE: &str = "2@Xq1f3nVbZkP0,AbCdEfGhIjKlMnOpQrStUvWxYz0123456789+/=,wxyz==,12345==";

#[test]
fn data_url_wraps_a_png() {
    let url = match render_data_url(CODE) {
        Ok(url) => url,
        Err(err) => panic!("code should render: {err}"),
    };
    let encoded = url
        .strip_prefix("data:image/png;base64,")
        .unwrap_or_else(|| panic!("unexpected prefix: {url}"));
    let png = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(err) => panic!("payload should be base64: {err}"),
    };
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
}

#[test]
fn terminal_rendering_is_multiline() {
    let art = match render_terminal("XYZ") {
        Ok(art) => art,
        Err(err) => panic!("code should render: {err}"),
    };
    assert!(art.lines().count() > 5);
}

#[test]
fn oversized_code_is_an_error() {
    let huge = "x".repeat(8000);
    assert!(render_data_url(&huge).is_err());
}
