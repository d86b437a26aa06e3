//! Disparity colorization
//!
//! Maps raw disparity values onto a jet-style color ramp so depth frames can
//! travel the same RGB path as the color preview. Low disparity (far) renders
//! blue, high disparity (near) renders red.

/// Map one disparity value in `[0, max_disparity]` to an RGB pixel.
pub fn disparity_to_rgb(value: u16, max_disparity: f32) -> [u8; 3] {
    let t = if max_disparity > 0.0 {
        (value as f32 / max_disparity).clamp(0.0, 1.0)
    } else {
        0.0
    };
    jet(t)
}

/// Colorize a full disparity map into `out` as packed RGB24.
pub fn colorize_disparity(values: &[u16], max_disparity: f32, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(values.len() * 3);
    for &value in values {
        let [r, g, b] = disparity_to_rgb(value, max_disparity);
        out.push(r);
        out.push(g);
        out.push(b);
    }
}

// Piecewise-linear approximation of the classic jet ramp.
fn jet(t: f32) -> [u8; 3] {
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}
