//! Color temperature estimation used by touch white balance

use crate::capture::frame::Frame;

/// Side of the square luma patch sampled around a touch point
pub const TOUCH_PATCH_SIZE: usize = 15;

/// sRGB primaries (XYZ coordinates, row major)
const PRIM: [f32; 9] = [
    1.939394, 0.500000, 2.500000, 1.000000, 1.000000, 1.000000, 0.090909, 0.166667, 13.166667,
];

/// Inverse of [`PRIM`]
const INV_PRIM: [f32; 9] = [
    0.689157, -0.326908, -0.106024, -0.693173, 1.341633, 0.029719, 0.004016, -0.014726, 0.076305,
];

fn linearize(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Chromaticity (x, y) of a CIE D illuminant, valid for 4000-25000K.
fn daylight_chromaticity(temp: f32) -> (f32, f32) {
    let t2 = temp * temp;
    let t3 = t2 * temp;
    let x = if temp < 7000.0 {
        -4.6070e9 / t3 + 2.9678e6 / t2 + 0.09911e3 / temp + 0.244063
    } else {
        -2.0064e9 / t3 + 1.9018e6 / t2 + 0.24748e3 / temp + 0.237040
    };
    let y = -3.0 * x * x + 2.870 * x - 0.275;
    (x, y)
}

/// Estimates the correlated color temperature of a normalized sRGB color,
/// taking the sRGB white point to be a daylight illuminant at `white_point`
/// Kelvin.
pub fn color_temperature(white_point: f32, r: f32, g: f32, b: f32) -> i32 {
    let (r, g, b) = (linearize(r), linearize(g), linearize(b));

    let (wxc, wyc) = daylight_chromaticity(white_point);
    let wx = wxc / wyc;
    let wy = 1.0;
    let wz = (1.0 - wxc - wyc) / wyc;

    // Linear sRGB with a custom white point to XYZ
    let r = r * (INV_PRIM[0] * wx + INV_PRIM[1] * wy + INV_PRIM[2] * wz);
    let g = g * (INV_PRIM[3] * wx + INV_PRIM[4] * wy + INV_PRIM[5] * wz);
    let b = b * (INV_PRIM[6] * wx + INV_PRIM[7] * wy + INV_PRIM[8] * wz);

    let x = PRIM[0] * r + PRIM[1] * g + PRIM[2] * b;
    let y = PRIM[3] * r + PRIM[4] * g + PRIM[5] * b;
    let z = PRIM[6] * r + PRIM[7] * g + PRIM[8] * b;

    let sum = x + y + z;
    if sum <= f32::EPSILON {
        return white_point as i32;
    }
    let cx = x / sum;
    let cy = y / sum;

    // McCamy-style exponential fit, 3000-50000K
    let n = (cx - 0.3366) / (cy - 0.1735);
    let cct = -949.86315
        + 6253.80338 * (-n / 0.92159).exp()
        + 28.70599 * (-n / 0.20039).exp()
        + 0.00004 * (-n / 0.07125).exp();

    cct as i32
}

/// [`color_temperature`] for an 8-bit YCbCr sample.
pub fn color_temperature_ycbcr(white_point: f32, y: i32, cb: i32, cr: i32) -> i32 {
    let (y, cb, cr) = (y as f32, (cb - 128) as f32, (cr - 128) as f32);
    let scale = 1.0 / 255.0;

    let r = ((y + 1.402 * cr) * scale).clamp(0.0, 1.0);
    let g = ((y - 0.34414 * cb - 0.71414 * cr) * scale).clamp(0.0, 1.0);
    let b = ((y + 1.722 * cb) * scale).clamp(0.0, 1.0);

    color_temperature(white_point, r, g, b)
}

/// Mean of a `size`×`size` patch whose top-left corner is at `offset`.
fn patch_average(plane: &[u8], offset: usize, stride: usize, size: usize) -> i32 {
    let sum: u32 = (0..size)
        .flat_map(|row| {
            let start = offset + row * stride;
            plane[start..start + size].iter()
        })
        .map(|v| *v as u32)
        .sum();
    (sum / (size * size) as u32) as i32
}

/// Color temperature of the patch centered at pixel (`tx`, `ty`) of a
/// YUV420p frame. The patch is moved inside the frame when the point is too
/// close to an edge. Returns `None` for frames too small to hold a patch.
pub fn local_color_temperature(white_point: f32, frame: &Frame, tx: i32, ty: i32) -> Option<i32> {
    let (y_plane, u_plane, v_plane) = frame.planes()?;
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let half = TOUCH_PATCH_SIZE / 2;
    if width < TOUCH_PATCH_SIZE + 1 || height < TOUCH_PATCH_SIZE + 1 {
        return None;
    }

    let tx = (tx.max(0) as usize).clamp(half, width - half - 1);
    let ty = (ty.max(0) as usize).clamp(half, height - half - 1);

    let y = patch_average(y_plane, width * (ty - half) + tx - half, width, TOUCH_PATCH_SIZE);

    let chroma_half = TOUCH_PATCH_SIZE / 4;
    let chroma_offset = (width / 2) * (ty / 2 - chroma_half) + tx / 2 - chroma_half;
    let cb = patch_average(u_plane, chroma_offset, width / 2, TOUCH_PATCH_SIZE / 2);
    let cr = patch_average(v_plane, chroma_offset, width / 2, TOUCH_PATCH_SIZE / 2);

    Some(color_temperature_ycbcr(white_point, y, cb, cr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat, Yuv420Image};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Instant;

    fn flat_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> Frame {
        let mut image = Yuv420Image::new(width, height);
        {
            let (yp, up, vp) = image.planes_mut();
            yp.fill(y);
            up.fill(u);
            vp.fill(v);
        }
        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: 1,
                width,
                height,
                format: PixelFormat::Yuv420p,
                exposure: 10000,
                gain: 1.0,
                white_balance: 6500,
                focus: 0.0,
                flash_brightness: 0.0,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_neutral_gray_matches_white_point() {
        let cct = color_temperature_ycbcr(6500.0, 128, 128, 128);
        assert!((cct - 6500).abs() < 200, "cct {cct}");
    }

    #[test]
    fn test_blue_is_cooler_than_red() {
        let neutral = color_temperature_ycbcr(6500.0, 128, 128, 128);
        let blue = color_temperature_ycbcr(6500.0, 128, 140, 120);
        let red = color_temperature_ycbcr(6500.0, 128, 120, 140);
        assert!(blue > neutral);
        assert!(red < neutral);
    }

    #[test]
    fn test_patch_clamped_at_corner() {
        let frame = flat_frame(64, 48, 128, 128, 128);
        let corner = local_color_temperature(6500.0, &frame, 0, 0).unwrap();
        let far = local_color_temperature(6500.0, &frame, 1000, 1000).unwrap();
        let center = local_color_temperature(6500.0, &frame, 32, 24).unwrap();
        assert_eq!(corner, center);
        assert_eq!(far, center);
    }

    #[test]
    fn test_tiny_frame_has_no_patch() {
        let frame = flat_frame(8, 8, 128, 128, 128);
        assert!(local_color_temperature(6500.0, &frame, 4, 4).is_none());
    }
}
