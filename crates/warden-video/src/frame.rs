//! Frame type and image processing: YUYV conversion, resize, crop,
//! brightness sampling, and the dark-pixel measure used for eye crops.

use thiserror::Error;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// True when the frame holds no pixels (degenerate crop).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Average brightness as the mean HSV value channel, i.e. the mean of
    /// `max(R, G, B)` over all pixels (0.0 to 255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = (self.width * self.height) as usize;
        if pixels == 0 {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .chunks_exact(3)
            .take(pixels)
            .map(|p| p[0].max(p[1]).max(p[2]) as f32)
            .sum();
        sum / pixels as f32
    }

    /// Resize to the target dimensions with bilinear interpolation.
    pub fn resize(&self, new_width: u32, new_height: u32) -> Frame {
        if new_width == self.width && new_height == self.height {
            return self.clone();
        }

        let w = self.width as usize;
        let h = self.height as usize;
        let nw = new_width as usize;
        let nh = new_height as usize;

        if w == 0 || h == 0 || nw == 0 || nh == 0 {
            return Frame {
                data: Vec::new(),
                width: 0,
                height: 0,
                timestamp: self.timestamp,
                sequence: self.sequence,
            };
        }

        let scale_x = w as f32 / nw as f32;
        let scale_y = h as f32 / nh as f32;
        let mut out = vec![0u8; nw * nh * 3];

        for y in 0..nh {
            let src_y = (y as f32 + 0.5) * scale_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
            let y1 = (y0 + 1).min(h - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..nw {
                let src_x = (x as f32 + 0.5) * scale_x - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
                let x1 = (x0 + 1).min(w - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                for c in 0..3 {
                    let tl = self.data[(y0 * w + x0) * 3 + c] as f32;
                    let tr = self.data[(y0 * w + x1) * 3 + c] as f32;
                    let bl = self.data[(y1 * w + x0) * 3 + c] as f32;
                    let br = self.data[(y1 * w + x1) * 3 + c] as f32;

                    let val = tl * (1.0 - fx) * (1.0 - fy)
                        + tr * fx * (1.0 - fy)
                        + bl * (1.0 - fx) * fy
                        + br * fx * fy;

                    out[(y * nw + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        Frame {
            data: out,
            width: new_width,
            height: new_height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Crop the rectangle `[x1, x2) x [y1, y2)`, clamped to the frame bounds.
    /// Out-of-range or inverted rectangles yield an empty frame.
    pub fn crop(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Frame {
        let w = self.width as i32;
        let h = self.height as i32;

        let cx1 = x1.clamp(0, w);
        let cy1 = y1.clamp(0, h);
        let cx2 = x2.clamp(0, w);
        let cy2 = y2.clamp(0, h);

        let cw = (cx2 - cx1).max(0) as usize;
        let ch = (cy2 - cy1).max(0) as usize;

        let mut out = Vec::with_capacity(cw * ch * 3);
        let src_w = self.width as usize;
        for y in 0..ch {
            let row = (cy1 as usize + y) * src_w + cx1 as usize;
            out.extend_from_slice(&self.data[row * 3..(row + cw) * 3]);
        }

        Frame {
            data: out,
            width: cw as u32,
            height: ch as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Mirror the frame around its vertical axis in place.
    pub fn flip_horizontal(&mut self) {
        let w = self.width as usize;
        for y in 0..self.height as usize {
            let row = y * w;
            for x in 0..w / 2 {
                let left = (row + x) * 3;
                let right = (row + w - 1 - x) * 3;
                for c in 0..3 {
                    self.data.swap(left + c, right + c);
                }
            }
        }
    }

    /// Encode the frame as JPEG at the given quality (1 to 100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(
            &self.data,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

/// Convert packed YUYV (4:2:2) to RGB using the BT.601 integer transform.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U and V shared
/// between the pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as i32;
        let v = chunk[3] as i32;
        for &y in &[chunk[0], chunk[2]] {
            let c = y as i32 - 16;
            let d = u - 128;
            let e = v - 128;
            rgb.push((((298 * c + 409 * e + 128) >> 8).clamp(0, 255)) as u8);
            rgb.push((((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255)) as u8);
            rgb.push((((298 * c + 516 * d + 128) >> 8).clamp(0, 255)) as u8);
        }
    }
    Ok(rgb)
}

/// Convert packed RGB to 8-bit grayscale with BT.601 luma weights.
pub fn rgb_to_grayscale(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = (width * height) as usize;
    rgb.chunks_exact(3)
        .take(pixels)
        .map(|p| {
            (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Smooth a grayscale image with the separable 3x3 Gaussian kernel
/// [0.25, 0.5, 0.25], reflecting borders without repeating the edge pixel.
pub fn gaussian_blur_3x3(gray: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    if w < 2 || h < 2 || gray.len() < w * h {
        return gray.to_vec();
    }

    const KERNEL: [f32; 3] = [0.25, 0.5, 0.25];

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, coeff) in KERNEL.iter().enumerate() {
                let sx = reflect101(x as i32 + k as i32 - 1, w as i32);
                acc += gray[y * w + sx] as f32 * coeff;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, coeff) in KERNEL.iter().enumerate() {
                let sy = reflect101(y as i32 + k as i32 - 1, h as i32);
                acc += horizontal[sy * w + x] * coeff;
            }
            out[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Mirror an out-of-range index back into `[0, len)` without repeating the
/// edge sample. Only valid for single-step overshoot, which is all a 3x3
/// kernel can produce.
fn reflect101(idx: i32, len: i32) -> usize {
    let i = if idx < 0 {
        -idx
    } else if idx >= len {
        2 * len - idx - 2
    } else {
        idx
    };
    i as usize
}

/// Count the dark pixels of an eye crop: grayscale, 3x3 Gaussian blur, then
/// count pixels at or below the cutoff. A pixel above the cutoff would
/// survive binary thresholding; everything else lands at zero.
pub fn dark_pixel_count(frame: &Frame, cutoff: u8) -> u32 {
    if frame.is_empty() {
        return 0;
    }
    let gray = rgb_to_grayscale(&frame.data, frame.width, frame.height);
    let blurred = gaussian_blur_3x3(&gray, frame.width, frame.height);
    blurred.iter().filter(|&&p| p <= cutoff).count() as u32
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
