//! Pixel primitives for the detection pipeline
//!
//! Small, allocation-honest operations over `image` buffers. The pipeline
//! only needs grayscale denoise, frame differencing, binarization, dilation
//! and connected-region extraction, so these are written directly against
//! the pixel data instead of pulling in a full CV stack.

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Rgb, RgbImage};

/// Encode a frame as JPEG for streaming or classifier upload.
pub fn encode_jpeg(frame: &RgbImage) -> crate::error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 80).encode_image(frame)?;
    Ok(buf)
}

/// A connected foreground region in a binary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub area: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// Convert a color frame to grayscale.
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

/// Separable box blur with the given radius.
///
/// Stands in for the original pipeline's large Gaussian denoise kernel;
/// edges use the clipped window so borders are not darkened.
pub fn box_blur(src: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return src.clone();
    }
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let r = radius as i64;

    // Horizontal pass
    let mut horiz = vec![0u8; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let lo = (x as i64 - r).max(0) as u32;
            let hi = (x as i64 + r).min(w as i64 - 1) as u32;
            let mut sum: u32 = 0;
            for xx in lo..=hi {
                sum += src.get_pixel(xx, y)[0] as u32;
            }
            horiz[(y * w + x) as usize] = (sum / (hi - lo + 1)) as u8;
        }
    }

    // Vertical pass
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let lo = (y as i64 - r).max(0) as u32;
            let hi = (y as i64 + r).min(h as i64 - 1) as u32;
            let mut sum: u32 = 0;
            for yy in lo..=hi {
                sum += horiz[(yy * w + x) as usize] as u32;
            }
            out.put_pixel(x, y, image::Luma([(sum / (hi - lo + 1)) as u8]));
        }
    }
    out
}

/// Per-pixel absolute difference of two equally sized grayscale images.
pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = GrayImage::new(a.width(), a.height());
    for (o, (pa, pb)) in out
        .pixels_mut()
        .zip(a.pixels().zip(b.pixels()))
    {
        o[0] = pa[0].abs_diff(pb[0]);
    }
    out
}

/// Binarize: pixels strictly above `thresh` become 255, the rest 0.
pub fn binarize(src: &GrayImage, thresh: u8) -> GrayImage {
    let mut out = GrayImage::new(src.width(), src.height());
    for (o, p) in out.pixels_mut().zip(src.pixels()) {
        o[0] = if p[0] > thresh { 255 } else { 0 };
    }
    out
}

/// Dilate a binary image with a 3x3 structuring element, `iterations` times.
///
/// Merges fragmented foreground blobs before region extraction.
pub fn dilate(src: &GrayImage, iterations: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut cur = src.clone();
    for _ in 0..iterations {
        let mut next = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let mut hit = false;
                'probe: for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx >= 0
                            && ny >= 0
                            && nx < w as i64
                            && ny < h as i64
                            && cur.get_pixel(nx as u32, ny as u32)[0] != 0
                        {
                            hit = true;
                            break 'probe;
                        }
                    }
                }
                if hit {
                    next.put_pixel(x, y, image::Luma([255]));
                }
            }
        }
        cur = next;
    }
    cur
}

/// Count foreground (non-zero) pixels.
pub fn count_nonzero(src: &GrayImage) -> u32 {
    src.pixels().filter(|p| p[0] != 0).count() as u32
}

/// Extract 8-connected foreground regions with area and bounding box.
pub fn regions(bin: &GrayImage) -> Vec<Region> {
    let (w, h) = bin.dimensions();
    let mut visited = vec![false; (w * h) as usize];
    let mut found = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for sy in 0..h {
        for sx in 0..w {
            let idx = (sy * w + sx) as usize;
            if visited[idx] || bin.get_pixel(sx, sy)[0] == 0 {
                continue;
            }

            let mut region = Region {
                area: 0,
                min_x: sx,
                min_y: sy,
                max_x: sx,
                max_y: sy,
            };
            visited[idx] = true;
            stack.push((sx, sy));

            while let Some((x, y)) = stack.pop() {
                region.area += 1;
                region.min_x = region.min_x.min(x);
                region.min_y = region.min_y.min(y);
                region.max_x = region.max_x.max(x);
                region.max_y = region.max_y.max(y);

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                            continue;
                        }
                        let (nx, ny) = (nx as u32, ny as u32);
                        let nidx = (ny * w + nx) as usize;
                        if !visited[nidx] && bin.get_pixel(nx, ny)[0] != 0 {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
            found.push(region);
        }
    }
    found
}

/// Draw a 2px rectangle outline around a region (visual feedback only).
pub fn draw_region(frame: &mut RgbImage, region: &Region, color: Rgb<u8>) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let x0 = region.min_x.min(w - 1);
    let y0 = region.min_y.min(h - 1);
    let x1 = region.max_x.min(w - 1);
    let y1 = region.max_y.min(h - 1);

    for t in 0..2u32 {
        let top = (y0 + t).min(h - 1);
        let bottom = y1.saturating_sub(t);
        for x in x0..=x1 {
            frame.put_pixel(x, top, color);
            frame.put_pixel(x, bottom, color);
        }
        let left = (x0 + t).min(w - 1);
        let right = x1.saturating_sub(t);
        for y in y0..=y1 {
            frame.put_pixel(left, y, color);
            frame.put_pixel(right, y, color);
        }
    }
}
