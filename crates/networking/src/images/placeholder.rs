//! Generated default logo: a colored circle with the symbol's initial

/// Channels below this value are lifted so the white letter stays readable
const MIN_CHANNEL: u8 = 64;

/// Deterministic color for a symbol
pub fn color_for_symbol(symbol: &str) -> (u8, u8, u8) {
    let mut hash: i32 = 0;
    for c in symbol.to_uppercase().chars() {
        hash = (c as i32).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash));
    }

    let r = ((hash >> 16) & 0xFF) as u8;
    let g = ((hash >> 8) & 0xFF) as u8;
    let b = (hash & 0xFF) as u8;
    (r.max(MIN_CHANNEL), g.max(MIN_CHANNEL), b.max(MIN_CHANNEL))
}

fn initial(symbol: &str) -> char {
    symbol
        .trim()
        .chars()
        .next()
        .filter(|c| c.is_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

/// SVG bytes for the placeholder logo
pub fn placeholder_svg(symbol: &str) -> Vec<u8> {
    let (r, g, b) = color_for_symbol(symbol);
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64" viewBox="0 0 64 64">"##,
            r##"<circle cx="32" cy="32" r="32" fill="#{:02X}{:02X}{:02X}"/>"##,
            r##"<text x="32" y="32" dy="0.35em" text-anchor="middle" "##,
            r##"font-family="Helvetica, Arial, sans-serif" font-size="28" font-weight="bold" fill="#FFFFFF">{}</text>"##,
            "</svg>"
        ),
        r,
        g,
        b,
        initial(symbol)
    )
    .into_bytes()
}
