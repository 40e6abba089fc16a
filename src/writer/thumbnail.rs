//! Box-filter thumbnail downsampling for YUV420p frames

use crate::capture::frame::{Frame, Yuv420Image};

/// Downsamples one image plane with a `radius`×`radius` box filter.
///
/// Source positions advance in 16.16 fixed point; the filter window is kept
/// inside the source by shrinking the sampled span by `radius & !1`.
pub fn downsample_channel(
    dst: &mut [u8],
    dst_width: usize,
    dst_height: usize,
    src: &[u8],
    src_width: usize,
    src_height: usize,
    radius: usize,
) {
    if dst_width == 0 || dst_height == 0 || radius == 0 {
        return;
    }
    let margin = radius & !1;
    if src_width < radius.max(margin + 1) || src_height < radius.max(margin + 1) {
        dst[..dst_width * dst_height].fill(0);
        return;
    }

    let norm = 0x10000 / (radius * radius) as u64;
    let ax = (((src_width - margin) as u64) << 16) / dst_width as u64;
    let ay = (((src_height - margin) as u64) << 16) / dst_height as u64;

    let mut ty = 0u64;
    for row in dst.chunks_exact_mut(dst_width).take(dst_height) {
        let src_row = (ty >> 16) as usize * src_width;
        let mut tx = 0u64;
        for out in row.iter_mut() {
            let origin = src_row + (tx >> 16) as usize;
            let sum: u64 = (0..radius)
                .flat_map(|y| {
                    let start = origin + y * src_width;
                    src[start..start + radius].iter()
                })
                .map(|v| *v as u64)
                .sum();
            *out = ((sum * norm) >> 16).min(255) as u8;
            tx += ax;
        }
        ty += ay;
    }
}

/// Builds a `width`×`height` thumbnail from a YUV420p frame. Returns `None`
/// for other pixel formats or invalid frames.
pub fn create_thumbnail(source: &Frame, width: u32, height: u32, radius: usize) -> Option<Yuv420Image> {
    let (src_y, src_u, src_v) = source.planes()?;
    let (sw, sh) = (source.width() as usize, source.height() as usize);
    let (dw, dh) = (width as usize, height as usize);

    let mut thumbnail = Yuv420Image::new(width, height);
    let (y, u, v) = thumbnail.planes_mut();

    downsample_channel(y, dw, dh, src_y, sw, sh, radius);
    downsample_channel(u, dw / 2, dh / 2, src_u, sw / 2, sh / 2, radius);
    downsample_channel(v, dw / 2, dh / 2, src_v, sw / 2, sh / 2, radius);

    Some(thumbnail)
}
