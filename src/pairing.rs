//! Out-of-band display of pairing challenges
//!
//! The QR art goes straight to stdout, not through `tracing`; log line
//! prefixes would break up the block characters.

use qrcode::QrCode;
use qrcode::render::unicode;
use tracing::{debug, info, warn};

/// Render a pairing payload as a terminal QR code
pub fn render_challenge(payload: &str) -> Option<String> {
    let code = QrCode::new(payload.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}

/// Print the challenge so an operator can scan it from the phone
pub fn display_challenge(payload: &str) {
    info!("📱 Scan this QR code with WhatsApp (Settings > Linked devices)");
    match render_challenge(payload) {
        Some(art) => println!("\n{}\n", art),
        None => {
            warn!("Could not render pairing QR code, raw payload follows");
            println!("{}", payload);
        }
    }
    debug!("Pairing payload: {}", payload);
}
