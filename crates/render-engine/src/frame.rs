//! Decoded video frames and pixel-format conversion.
//!
//! Frames travel through the pipeline as tightly packed raw bytes in one of
//! the pixel formats below, which are exactly the bytes the encoder reads on
//! its input. Compositing works on RGBA images; every other format converts
//! through RGBA. YUV formats use BT.601 coefficients, limited range for
//! `yuv420p` and full range for `yuvj420p`, with chroma planes of
//! `ceil(w/2) x ceil(h/2)`.

use std::fmt;
use std::str::FromStr;

use cutline_common::error::{CutlineError, CutlineResult};
use image::RgbaImage;

/// Raw pixel layout of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuv420p,
    Yuvj420p,
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    Gray,
    /// A format this pipeline cannot consume directly.
    Other(String),
}

impl PixelFormat {
    /// The ffmpeg name of the format.
    pub fn name(&self) -> &str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Argb => "argb",
            PixelFormat::Abgr => "abgr",
            PixelFormat::Gray => "gray",
            PixelFormat::Other(name) => name,
        }
    }

    /// Whether frames in this format can be composited and handed to the
    /// encoder without going through the fallback format.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, PixelFormat::Other(_))
    }

    /// Pick the format for a whole render pass: the source format when it is
    /// allowed, otherwise `fallback`.
    pub fn select_target(source: &PixelFormat, fallback: &PixelFormat) -> PixelFormat {
        if source.is_allowed() {
            source.clone()
        } else {
            fallback.clone()
        }
    }

    /// Bytes occupied by one `width x height` frame.
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let pixels = w.checked_mul(h)?;
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?;
                pixels.checked_add(chroma.checked_mul(2)?)
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
                pixels.checked_mul(4)
            }
            PixelFormat::Gray => Some(pixels),
            PixelFormat::Other(_) => None,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "yuv420p" => PixelFormat::Yuv420p,
            "yuvj420p" => PixelFormat::Yuvj420p,
            "rgb24" => PixelFormat::Rgb24,
            "bgr24" => PixelFormat::Bgr24,
            "rgba" => PixelFormat::Rgba,
            "bgra" => PixelFormat::Bgra,
            "argb" => PixelFormat::Argb,
            "abgr" => PixelFormat::Abgr,
            "gray" | "gray8" => PixelFormat::Gray,
            other => PixelFormat::Other(other.to_string()),
        })
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Presentation time in seconds.
    pub presentation_time: f64,
    pub key_frame: bool,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl VideoFrame {
    /// Wrap raw bytes, checking they match the format's frame size.
    pub fn new(
        presentation_time: f64,
        key_frame: bool,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> CutlineResult<Self> {
        let expected = format.frame_size(width, height).ok_or_else(|| {
            CutlineError::unsupported(format!("pixel format '{format}' has no raw layout"))
        })?;
        if data.len() != expected {
            return Err(CutlineError::decode(format!(
                "{format} frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            presentation_time,
            key_frame,
            format,
            width,
            height,
            data,
        })
    }

    /// Raw bytes in `self.format`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Decode into an RGBA image.
    pub fn to_rgba_image(&self) -> CutlineResult<RgbaImage> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgba = vec![0u8; w * h * 4];
        let src = &self.data;

        match self.format {
            PixelFormat::Rgba => rgba.copy_from_slice(src),
            PixelFormat::Rgb24 => expand(src, &mut rgba, 3, |p| [p[0], p[1], p[2], 255]),
            PixelFormat::Bgr24 => expand(src, &mut rgba, 3, |p| [p[2], p[1], p[0], 255]),
            PixelFormat::Bgra => expand(src, &mut rgba, 4, |p| [p[2], p[1], p[0], p[3]]),
            PixelFormat::Argb => expand(src, &mut rgba, 4, |p| [p[1], p[2], p[3], p[0]]),
            PixelFormat::Abgr => expand(src, &mut rgba, 4, |p| [p[3], p[2], p[1], p[0]]),
            PixelFormat::Gray => expand(src, &mut rgba, 1, |p| [p[0], p[0], p[0], 255]),
            PixelFormat::Yuv420p => yuv420_to_rgba(src, &mut rgba, w, h, YuvRange::Limited),
            PixelFormat::Yuvj420p => yuv420_to_rgba(src, &mut rgba, w, h, YuvRange::Full),
            PixelFormat::Other(ref name) => {
                return Err(CutlineError::unsupported(format!(
                    "cannot convert from pixel format '{name}'"
                )))
            }
        }

        RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| CutlineError::render("RGBA buffer size mismatch"))
    }

    /// Encode an RGBA image into a frame of the given format.
    pub fn from_rgba_image(
        image: &RgbaImage,
        format: PixelFormat,
        presentation_time: f64,
        key_frame: bool,
    ) -> CutlineResult<Self> {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let src = image.as_raw();

        let data = match format {
            PixelFormat::Rgba => src.clone(),
            PixelFormat::Rgb24 => pack(src, 3, |p, out| out.copy_from_slice(&p[..3])),
            PixelFormat::Bgr24 => pack(src, 3, |p, out| out.copy_from_slice(&[p[2], p[1], p[0]])),
            PixelFormat::Bgra => pack(src, 4, |p, out| {
                out.copy_from_slice(&[p[2], p[1], p[0], p[3]])
            }),
            PixelFormat::Argb => pack(src, 4, |p, out| {
                out.copy_from_slice(&[p[3], p[0], p[1], p[2]])
            }),
            PixelFormat::Abgr => pack(src, 4, |p, out| {
                out.copy_from_slice(&[p[3], p[2], p[1], p[0]])
            }),
            PixelFormat::Gray => pack(src, 1, |p, out| out[0] = full_range_luma(p)),
            PixelFormat::Yuv420p => rgba_to_yuv420(src, w, h, YuvRange::Limited),
            PixelFormat::Yuvj420p => rgba_to_yuv420(src, w, h, YuvRange::Full),
            PixelFormat::Other(ref name) => {
                return Err(CutlineError::unsupported(format!(
                    "cannot convert to pixel format '{name}'"
                )))
            }
        };

        Self::new(presentation_time, key_frame, format, width, height, data)
    }

    /// Convert to `target`, returning a copy when the format already matches.
    pub fn reformat(&self, target: &PixelFormat) -> CutlineResult<Self> {
        if &self.format == target {
            return Ok(self.clone());
        }
        let rgba = self.to_rgba_image()?;
        Self::from_rgba_image(&rgba, target.clone(), self.presentation_time, self.key_frame)
    }
}

fn expand(src: &[u8], rgba: &mut [u8], stride: usize, f: impl Fn(&[u8]) -> [u8; 4]) {
    for (pixel, out) in src.chunks_exact(stride).zip(rgba.chunks_exact_mut(4)) {
        out.copy_from_slice(&f(pixel));
    }
}

fn pack(src: &[u8], stride: usize, f: impl Fn(&[u8], &mut [u8])) -> Vec<u8> {
    let mut data = vec![0u8; src.len() / 4 * stride];
    for (pixel, out) in src.chunks_exact(4).zip(data.chunks_exact_mut(stride)) {
        f(pixel, out);
    }
    data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum YuvRange {
    Limited,
    Full,
}

fn full_range_luma(p: &[u8]) -> u8 {
    let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
    (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn yuv_to_rgb(y: u8, u: u8, v: u8, range: YuvRange) -> [u8; 3] {
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    match range {
        YuvRange::Limited => {
            let c = 1.164_383 * (y as f32 - 16.0);
            [
                clamp_u8(c + 1.596_027 * e),
                clamp_u8(c - 0.391_762 * d - 0.812_968 * e),
                clamp_u8(c + 2.017_232 * d),
            ]
        }
        YuvRange::Full => {
            let c = y as f32;
            [
                clamp_u8(c + 1.402 * e),
                clamp_u8(c - 0.344_136 * d - 0.714_136 * e),
                clamp_u8(c + 1.772 * d),
            ]
        }
    }
}

fn rgb_to_yuv(r: f32, g: f32, b: f32, range: YuvRange) -> (f32, f32, f32) {
    match range {
        YuvRange::Limited => (
            16.0 + 0.256_788 * r + 0.504_129 * g + 0.097_906 * b,
            128.0 - 0.148_223 * r - 0.290_993 * g + 0.439_216 * b,
            128.0 + 0.439_216 * r - 0.367_788 * g - 0.071_427 * b,
        ),
        YuvRange::Full => (
            0.299 * r + 0.587 * g + 0.114 * b,
            128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
            128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
        ),
    }
}

fn yuv420_to_rgba(src: &[u8], rgba: &mut [u8], w: usize, h: usize, range: YuvRange) {
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let (y_plane, chroma) = src.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(cw * ch);

    for row in 0..h {
        for col in 0..w {
            let ci = (row / 2) * cw + col / 2;
            let [r, g, b] = yuv_to_rgb(y_plane[row * w + col], u_plane[ci], v_plane[ci], range);
            let o = (row * w + col) * 4;
            rgba[o..o + 4].copy_from_slice(&[r, g, b, 255]);
        }
    }
}

fn rgba_to_yuv420(src: &[u8], w: usize, h: usize, range: YuvRange) -> Vec<u8> {
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let mut data = vec![0u8; w * h + 2 * cw * ch];
    let (y_plane, chroma) = data.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    let mut u_acc = vec![0f32; cw * ch];
    let mut v_acc = vec![0f32; cw * ch];
    let mut counts = vec![0f32; cw * ch];

    for row in 0..h {
        for col in 0..w {
            let o = (row * w + col) * 4;
            let (y, u, v) = rgb_to_yuv(src[o] as f32, src[o + 1] as f32, src[o + 2] as f32, range);
            y_plane[row * w + col] = clamp_u8(y);

            let ci = (row / 2) * cw + col / 2;
            u_acc[ci] += u;
            v_acc[ci] += v;
            counts[ci] += 1.0;
        }
    }

    for ci in 0..cw * ch {
        let n = counts[ci].max(1.0);
        u_plane[ci] = clamp_u8(u_acc[ci] / n);
        v_plane[ci] = clamp_u8(v_acc[ci] / n);
    }

    data
}
