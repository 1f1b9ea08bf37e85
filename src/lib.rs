//! Guardian relay: notifies student guardians over WhatsApp.
//!
//! Accepts batches of student/guardian records over HTTP and sends each
//! guardian a templated credentials message, optionally with an image,
//! through a WhatsApp Web bridge sidecar. The bridge is logged in by
//! scanning a QR code exposed at `GET /whatsapp-qr`.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod recipient;
pub mod session;
pub mod template;
pub mod whatsapp;

pub mod delivery;
pub mod server;
