//! Geometric transforms: colour normalisation, half-page split, resize,
//! orientation, framing and palette quantization.
//!
//! Every transform consumes its raster and either returns the transformed one
//! or hands the original back inside [`Rejected`].

use fast_image_resize as fr;
use fr::images::Image as FrImage;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::rect::Rect;

use super::{Rejected, TransformResult};

/// Half of a double-page spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Entries of a quantization palette once padded.
pub const PALETTE_SLOTS: usize = 256;

/// Convert any colour mode to 8-bit RGB. RGB input is returned as is.
pub fn to_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.into_rgb8(),
    }
}

/// Crop to the left or right half. The left half is `floor(w / 2)` wide, the
/// right half takes the remaining columns.
pub fn split_half(img: RgbImage, side: Side) -> TransformResult {
    let (width, height) = img.dimensions();
    if width < 2 || height == 0 {
        return Err(Rejected::new(img, "split", "raster too narrow to split"));
    }

    let half = width / 2;
    let (x, w) = match side {
        Side::Left => (0, half),
        Side::Right => (half, width - half),
    };
    Ok(imageops::crop_imm(&img, x, 0, w, height).to_image())
}

/// Scale down to fit inside the target, keeping the aspect ratio.
///
/// Rasters that already fit are returned untouched; this never upsamples.
pub fn resize_fit(img: RgbImage, target_width: u32, target_height: u32) -> TransformResult {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Rejected::new(img, "resize", "empty raster"));
    }
    if width <= target_width && height <= target_height {
        return Ok(img);
    }

    let (new_width, new_height) = fit_dimensions((width, height), (target_width, target_height));
    lanczos(img, new_width, new_height)
}

/// Resize to exactly the target, ignoring the aspect ratio.
pub fn stretch_fit(img: RgbImage, target_width: u32, target_height: u32) -> TransformResult {
    if img.width() == 0 || img.height() == 0 {
        return Err(Rejected::new(img, "stretch", "empty raster"));
    }
    if img.dimensions() == (target_width, target_height) {
        return Ok(img);
    }
    lanczos(img, target_width, target_height)
}

/// Size a raster fits to, deciding the limiting axis by comparing each
/// dimension's ratio to its target.
fn fit_dimensions((width, height): (u32, u32), (target_width, target_height): (u32, u32)) -> (u32, u32) {
    let aspect = width as f64 / height as f64;
    let width_ratio = width as f64 / target_width as f64;
    let height_ratio = height as f64 / target_height as f64;

    let (w, h) = if width_ratio > height_ratio {
        (target_width, (target_width as f64 / aspect) as u32)
    } else if width_ratio < height_ratio {
        ((target_height as f64 * aspect) as u32, target_height)
    } else {
        (target_width, target_height)
    };
    (w.max(1), h.max(1))
}

fn lanczos(img: RgbImage, new_width: u32, new_height: u32) -> TransformResult {
    if new_width == 0 || new_height == 0 {
        return Err(Rejected::new(img, "resize", "target has a zero dimension"));
    }
    let (width, height) = img.dimensions();
    let mut src_buffer = img.into_raw();
    let mut dst_buffer = vec![0u8; new_width as usize * new_height as usize * 3];

    let resized = resize_buffers(
        &mut src_buffer,
        (width, height),
        &mut dst_buffer,
        (new_width, new_height),
    );

    match resized.and_then(|()| {
        RgbImage::from_raw(new_width, new_height, dst_buffer)
            .ok_or_else(|| "resized buffer size mismatch".to_string())
    }) {
        Ok(resized) => Ok(resized),
        Err(detail) => {
            let original = RgbImage::from_raw(width, height, src_buffer)
                .unwrap_or_else(|| RgbImage::new(width, height));
            Err(Rejected::new(original, "resize", detail))
        }
    }
}

fn resize_buffers(
    src: &mut [u8],
    (width, height): (u32, u32),
    dst: &mut [u8],
    (new_width, new_height): (u32, u32),
) -> Result<(), String> {
    let src_image = FrImage::from_slice_u8(width, height, src, fr::PixelType::U8x3)
        .map_err(|e| e.to_string())?;
    let mut dst_image = FrImage::from_slice_u8(new_width, new_height, dst, fr::PixelType::U8x3)
        .map_err(|e| e.to_string())?;

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            Some(
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
            ),
        )
        .map_err(|e| e.to_string())
}

/// Rotate a quarter turn counter-clockwise when the raster's orientation
/// disagrees with the target's.
pub fn orient(img: RgbImage, target_width: u32, target_height: u32) -> TransformResult {
    let (width, height) = img.dimensions();
    if (width > height) != (target_width > target_height) {
        Ok(rotate_image_90(&img))
    } else {
        Ok(img)
    }
}

fn rotate_image_90(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let mut rotated = RgbImage::new(height, width);
    for (x, y, pixel) in img.enumerate_pixels() {
        rotated.put_pixel(y, width - 1 - x, *pixel);
    }
    rotated
}

/// Fill a palette up to [`PALETTE_SLOTS`] entries by repeating its first entry.
///
/// Kept for parity with pages produced by earlier converters: the pad slots
/// all alias entry 0.
pub fn pad_palette(palette: &[Rgb<u8>]) -> Vec<Rgb<u8>> {
    let mut padded: Vec<Rgb<u8>> = palette.iter().take(PALETTE_SLOTS).copied().collect();
    if let Some(&first) = palette.first() {
        padded.resize(PALETTE_SLOTS, first);
    }
    padded
}

/// Map every pixel onto the palette with Floyd-Steinberg error diffusion.
pub fn quantize(img: RgbImage, palette: &[Rgb<u8>]) -> TransformResult {
    if palette.is_empty() {
        return Err(Rejected::new(img, "quantize", "empty palette"));
    }
    let palette = pad_palette(palette);
    let (width, height) = img.dimensions();
    let (w, h) = (width as usize, height as usize);

    // error rows for the current and the next scanline, one slot of padding each side
    let mut current = vec![[0i32; 3]; w + 2];
    let mut next = vec![[0i32; 3]; w + 2];
    let mut out = RgbImage::new(width, height);

    for y in 0..h {
        for x in 0..w {
            let source = img.get_pixel(x as u32, y as u32).0;
            let wanted: [i32; 3] =
                std::array::from_fn(|c| (source[c] as i32 + current[x + 1][c] / 16).clamp(0, 255));
            let chosen = nearest(&palette, wanted);
            out.put_pixel(x as u32, y as u32, chosen);

            for c in 0..3 {
                let err = wanted[c] - chosen.0[c] as i32;
                current[x + 2][c] += err * 7;
                next[x][c] += err * 3;
                next[x + 1][c] += err * 5;
                next[x + 2][c] += err;
            }
        }
        std::mem::swap(&mut current, &mut next);
        next.iter_mut().for_each(|e| *e = [0; 3]);
    }

    Ok(out)
}

/// First palette entry at the smallest squared RGB distance.
fn nearest(palette: &[Rgb<u8>], wanted: [i32; 3]) -> Rgb<u8> {
    let mut best = palette[0];
    let mut best_distance = i32::MAX;
    for entry in palette {
        let distance: i32 = (0..3)
            .map(|c| {
                let d = wanted[c] - entry.0[c] as i32;
                d * d
            })
            .sum();
        if distance < best_distance {
            best_distance = distance;
            best = *entry;
            if distance == 0 {
                break;
            }
        }
    }
    best
}

/// Centre the raster on a target-sized canvas and draw a one-pixel border
/// around it.
pub fn frame(
    img: RgbImage,
    foreground: Rgb<u8>,
    background: Rgb<u8>,
    target_width: u32,
    target_height: u32,
) -> TransformResult {
    if target_width == 0 || target_height == 0 {
        return Err(Rejected::new(img, "frame", "target has a zero dimension"));
    }
    let (width, height) = img.dimensions();
    let mut canvas = RgbImage::from_pixel(target_width, target_height, background);

    let x_offset = target_width.saturating_sub(width) / 2;
    let y_offset = target_height.saturating_sub(height) / 2;
    imageops::overlay(&mut canvas, &img, x_offset.into(), y_offset.into());

    let border = Rect::at(x_offset as i32 - 1, y_offset as i32 - 1).of_size(width + 2, height + 2);
    draw_hollow_rect_mut(&mut canvas, border, foreground);

    Ok(canvas)
}
