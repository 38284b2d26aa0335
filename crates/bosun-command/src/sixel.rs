//! Sixel image decoding and PNG re-encoding.
//!
//! The output stage hands this module one complete DCS sequence
//! (`ESC P … q … ESC \`). Chat clients cannot render sixel, so the raster
//! is decoded here and re-encoded as PNG for file upload.
//!
//! Supported sixel features: raster attributes (`"Pan;Pad;Ph;Pv`), RGB and
//! HLS color registers (`#n;2;R;G;B`, `#n;1;H;L;S`), register selection
//! (`#n`), repeat runs (`!n`), carriage control (`$`, `-`), and canvas
//! growth past the declared raster size. Unpainted pixels stay transparent.

use std::collections::HashMap;
use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

/// Upper bound on either raster dimension.
const MAX_DIM: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SixelError {
    #[error("not a sixel sequence")]
    NotSixel,
    #[error("sixel sequence paints no pixels")]
    Empty,
    #[error("sixel raster too large: {0}x{1}")]
    TooLarge(usize, usize),
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Convert a complete DCS sixel sequence into PNG bytes.
pub fn sixel_to_png(data: &[u8]) -> Result<Vec<u8>, SixelError> {
    let img = decode(data)?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn decode(data: &[u8]) -> Result<RgbaImage, SixelError> {
    if !data.starts_with(&[0x1b, b'P']) {
        return Err(SixelError::NotSixel);
    }
    let mut i = 2;
    // Header parameters up to the `q` that commits the DCS to sixel.
    while i < data.len() && data[i] != b'q' {
        match data[i] {
            b'0'..=b'9' | b';' => i += 1,
            _ => return Err(SixelError::NotSixel),
        }
    }
    if i >= data.len() {
        return Err(SixelError::NotSixel);
    }
    i += 1;

    let body_end = if data.ends_with(&[0x1b, b'\\']) {
        data.len() - 2
    } else {
        data.len()
    };

    let mut canvas = Canvas::default();
    let mut palette: HashMap<u32, Rgba<u8>> = HashMap::new();
    let mut color = Rgba([0, 0, 0, 255]);
    let mut x = 0usize;
    let mut y = 0usize;

    while i < body_end {
        match data[i] {
            b'"' => {
                i += 1;
                let params = read_params(data, &mut i);
                if params.len() >= 4 {
                    canvas.declare(params[2] as usize, params[3] as usize)?;
                }
            }
            b'#' => {
                i += 1;
                let params = read_params(data, &mut i);
                match params.as_slice() {
                    [register] => {
                        color = palette
                            .get(register)
                            .copied()
                            .unwrap_or(Rgba([0, 0, 0, 255]));
                    }
                    [register, system, a, b, c] => {
                        let rgba = match *system {
                            1 => hls_to_rgba(*a, *b, *c),
                            2 => Rgba([scale_pct(*a), scale_pct(*b), scale_pct(*c), 255]),
                            _ => continue,
                        };
                        palette.insert(*register, rgba);
                    }
                    _ => {}
                }
            }
            b'!' => {
                i += 1;
                let params = read_params(data, &mut i);
                let count = params.first().copied().unwrap_or(1) as usize;
                if i < body_end && (0x3f..=0x7e).contains(&data[i]) {
                    let bits = data[i] - 0x3f;
                    for _ in 0..count {
                        canvas.paint_column(x, y, bits, color)?;
                        x += 1;
                    }
                    i += 1;
                }
            }
            b'$' => {
                x = 0;
                i += 1;
            }
            b'-' => {
                x = 0;
                y += 6;
                i += 1;
            }
            c @ 0x3f..=0x7e => {
                canvas.paint_column(x, y, c - 0x3f, color)?;
                x += 1;
                i += 1;
            }
            // Whitespace and anything else between directives is ignored.
            _ => i += 1,
        }
    }

    canvas.into_image()
}

fn read_params(data: &[u8], i: &mut usize) -> Vec<u32> {
    let mut params = Vec::new();
    let mut current: Option<u32> = None;
    while *i < data.len() {
        match data[*i] {
            d @ b'0'..=b'9' => {
                let v = current.unwrap_or(0);
                current = Some(v.saturating_mul(10) + u32::from(d - b'0'));
            }
            b';' => {
                params.push(current.take().unwrap_or(0));
            }
            _ => break,
        }
        *i += 1;
    }
    if let Some(v) = current {
        params.push(v);
    }
    params
}

fn scale_pct(v: u32) -> u8 {
    (v.min(100) * 255 / 100) as u8
}

/// Sixel HLS uses H in degrees and L/S in percent.
fn hls_to_rgba(h: u32, l: u32, s: u32) -> Rgba<u8> {
    let h = (h % 360) as f32;
    let l = (l.min(100) as f32) / 100.0;
    let s = (s.min(100) as f32) / 100.0;

    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let xc = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, xc, 0.0),
        1 => (xc, c, 0.0),
        2 => (0.0, c, xc),
        3 => (0.0, xc, c),
        4 => (xc, 0.0, c),
        _ => (c, 0.0, xc),
    };
    let m = l - c / 2.0;
    let to_u8 = |v: f32| ((v + m).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([to_u8(r1), to_u8(g1), to_u8(b1), 255])
}

/// Growable RGBA raster addressed by sixel columns.
#[derive(Default)]
struct Canvas {
    alloc_w: usize,
    alloc_h: usize,
    used_w: usize,
    used_h: usize,
    px: Vec<Option<Rgba<u8>>>,
}

impl Canvas {
    /// Record the raster size announced by the `"` attributes.
    fn declare(&mut self, w: usize, h: usize) -> Result<(), SixelError> {
        self.ensure(w, h)?;
        self.used_w = self.used_w.max(w);
        self.used_h = self.used_h.max(h);
        Ok(())
    }

    fn paint_column(
        &mut self,
        x: usize,
        y: usize,
        bits: u8,
        color: Rgba<u8>,
    ) -> Result<(), SixelError> {
        if bits == 0 {
            // A blank column still advances the cursor past declared bounds.
            return Ok(());
        }
        self.ensure(x + 1, y + 6)?;
        for row in 0..6 {
            if bits & (1 << row) != 0 {
                let yy = y + row;
                self.px[yy * self.alloc_w + x] = Some(color);
                self.used_w = self.used_w.max(x + 1);
                self.used_h = self.used_h.max(yy + 1);
            }
        }
        Ok(())
    }

    fn ensure(&mut self, w: usize, h: usize) -> Result<(), SixelError> {
        if w > MAX_DIM || h > MAX_DIM {
            return Err(SixelError::TooLarge(w, h));
        }
        if w <= self.alloc_w && h <= self.alloc_h {
            return Ok(());
        }
        let new_w = grow(self.alloc_w, w);
        let new_h = grow(self.alloc_h, h);
        let mut next = vec![None; new_w * new_h];
        for row in 0..self.used_h {
            let src = row * self.alloc_w;
            let dst = row * new_w;
            next[dst..dst + self.alloc_w].copy_from_slice(&self.px[src..src + self.alloc_w]);
        }
        self.alloc_w = new_w;
        self.alloc_h = new_h;
        self.px = next;
        Ok(())
    }

    fn into_image(self) -> Result<RgbaImage, SixelError> {
        if self.used_w == 0 || self.used_h == 0 {
            return Err(SixelError::Empty);
        }
        let (w, h) = (self.used_w, self.used_h);
        let img = RgbaImage::from_fn(w as u32, h as u32, |x, y| {
            self.px[y as usize * self.alloc_w + x as usize].unwrap_or(Rgba([0, 0, 0, 0]))
        });
        Ok(img)
    }
}

/// Geometric growth keeps repeated column-by-column painting from
/// reallocating per pixel.
fn grow(current: usize, needed: usize) -> usize {
    needed.max(current * 2).min(MAX_DIM)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 4x6 solid red rectangle:
    /// `"1;1;4;6` raster 4 wide, 6 tall; `#1;2;100;0;0` register 1 = 100%
    /// red; `#1` select; `~~~~` four full columns.
    pub(crate) const RED_RECT: &[u8] = b"\x1bPq\"1;1;4;6#1;2;100;0;0#1~~~~\x1b\\";

    #[test]
    fn decodes_minimal_red_rect() {
        let img = decode(RED_RECT).unwrap();
        assert_eq!(img.dimensions(), (4, 6));
        for (_, _, px) in img.enumerate_pixels() {
            assert_eq!(*px, Rgba([255, 0, 0, 255]));
        }
    }

    #[test]
    fn produces_png_bytes() {
        let png = sixel_to_png(RED_RECT).unwrap();
        assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn repeat_runs_expand() {
        // `!4~` paints the same four columns as `~~~~`.
        let repeated = b"\x1bPq\"1;1;4;6#1;2;100;0;0#1!4~\x1b\\";
        let a = decode(RED_RECT).unwrap();
        let b = decode(repeated).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn line_feed_advances_six_rows() {
        // Two bands of one column each: `@` paints only the top row of a band.
        let two_bands = b"\x1bPq#1;2;0;100;0#1@-@\x1b\\";
        let img = decode(two_bands).unwrap();
        assert_eq!(img.dimensions(), (1, 7));
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
        assert_eq!(*img.get_pixel(0, 6), Rgba([0, 255, 0, 255]));
        // Rows in between stay transparent.
        assert_eq!(img.get_pixel(0, 3).0[3], 0);
    }

    #[test]
    fn carriage_return_overpaints() {
        // Paint a column red, return, repaint blue.
        let data = b"\x1bPq#1;2;100;0;0#2;2;0;0;100#1~$#2~\x1b\\";
        let img = decode(data).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn hls_register_is_accepted() {
        // HLS 120 deg, 50% lightness, 100% saturation = pure green.
        let data = b"\x1bPq#1;1;120;50;100#1~\x1b\\";
        let img = decode(data).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn rejects_non_sixel_dcs() {
        assert!(matches!(decode(b"\x1bPfoo\x1b\\"), Err(SixelError::NotSixel)));
        assert!(matches!(decode(b"hello"), Err(SixelError::NotSixel)));
    }

    #[test]
    fn rejects_empty_raster() {
        assert!(matches!(decode(b"\x1bPq\x1b\\"), Err(SixelError::Empty)));
    }

    #[test]
    fn rejects_oversized_raster() {
        let data = b"\x1bPq\"1;1;99999;6#1~\x1b\\";
        assert!(matches!(decode(data), Err(SixelError::TooLarge(..))));
    }
}
