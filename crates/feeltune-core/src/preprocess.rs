//! Image preprocessing: grayscale conversion, face cropping, bilinear resize
//! and normalization into classifier patches.

use crate::types::{FacePatch, FaceRegion, GrayFrame, Image, ImageError, PATCH_SIZE};

// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Convert an image to a single-channel frame.
///
/// Single-channel images are copied through unchanged.
pub fn to_grayscale(image: &Image) -> GrayFrame {
    let data = match image.channels() {
        1 => image.data().to_vec(),
        _ => image
            .data()
            .chunks_exact(3)
            .map(|px| {
                let y = px[0] as f32 * LUMA_R + px[1] as f32 * LUMA_G + px[2] as f32 * LUMA_B;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect(),
    };

    GrayFrame {
        data,
        width: image.width(),
        height: image.height(),
    }
}

/// Copy the pixels of `region` out of `frame`.
///
/// A region reaching past the right or bottom edge is clipped to the frame;
/// a region starting outside the frame, or with zero area, is an error.
pub fn crop(frame: &GrayFrame, region: &FaceRegion) -> Result<(Vec<u8>, u32, u32), ImageError> {
    let out_of_bounds = || ImageError::RegionOutOfBounds {
        region: *region,
        width: frame.width,
        height: frame.height,
    };

    if region.x >= frame.width || region.y >= frame.height {
        return Err(out_of_bounds());
    }
    let w = region.width.min(frame.width - region.x);
    let h = region.height.min(frame.height - region.y);
    if w == 0 || h == 0 {
        return Err(out_of_bounds());
    }

    let stride = frame.width as usize;
    let mut out = Vec::with_capacity(w as usize * h as usize);
    for row in region.y..region.y + h {
        let start = row as usize * stride + region.x as usize;
        out.extend_from_slice(&frame.data[start..start + w as usize]);
    }
    Ok((out, w, h))
}

/// Resize a grayscale buffer using bilinear interpolation with pixel-center
/// alignment.
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    let mut resized = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    resized
}

/// Crop a face, resize it to 48×48 and scale intensities to [0, 1].
pub fn face_patch(frame: &GrayFrame, region: &FaceRegion) -> Result<FacePatch, ImageError> {
    let (pixels, w, h) = crop(frame, region)?;
    let resized = resize_bilinear(&pixels, w as usize, h as usize, PATCH_SIZE, PATCH_SIZE);
    Ok(FacePatch::from_values(
        resized.iter().map(|&p| p as f32 / 255.0).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(data: Vec<u8>, width: u32, height: u32) -> GrayFrame {
        GrayFrame { data, width, height }
    }

    #[test]
    fn test_grayscale_uses_luma_weights() {
        // Pure red, green, blue, white
        let img = Image::new(
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
            4,
            1,
            3,
        )
        .unwrap();
        let g = to_grayscale(&img);
        assert_eq!(g.data, vec![76, 150, 29, 255]);
        assert_eq!((g.width, g.height), (4, 1));
    }

    #[test]
    fn test_grayscale_passthrough_single_channel() {
        let img = Image::new(vec![1, 2, 3, 4], 2, 2, 1).unwrap();
        assert_eq!(to_grayscale(&img).data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_crop_inside() {
        // 4x3 frame with value = index
        let frame = gray((0..12).collect(), 4, 3);
        let region = FaceRegion { x: 1, y: 1, width: 2, height: 2 };
        let (px, w, h) = crop(&frame, &region).unwrap();
        assert_eq!((w, h), (2, 2));
        assert_eq!(px, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let frame = gray((0..12).collect(), 4, 3);
        let region = FaceRegion { x: 3, y: 2, width: 10, height: 10 };
        let (px, w, h) = crop(&frame, &region).unwrap();
        assert_eq!((w, h), (1, 1));
        assert_eq!(px, vec![11]);
    }

    #[test]
    fn test_crop_outside_is_error() {
        let frame = gray(vec![0; 16], 4, 4);
        let region = FaceRegion { x: 4, y: 0, width: 2, height: 2 };
        assert!(matches!(
            crop(&frame, &region),
            Err(ImageError::RegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_crop_zero_area_is_error() {
        let frame = gray(vec![0; 16], 4, 4);
        let region = FaceRegion { x: 0, y: 0, width: 0, height: 2 };
        assert!(crop(&frame, &region).is_err());
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 100 * 100];
        let out = resize_bilinear(&src, 100, 100, 48, 48);
        assert_eq!(out.len(), 48 * 48);
        assert!(out.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }

    #[test]
    fn test_resize_upscale_single_pixel() {
        let out = resize_bilinear(&[200], 1, 1, 3, 3);
        assert_eq!(out, vec![200; 9]);
    }

    #[test]
    fn test_face_patch_normalized() {
        let frame = gray(vec![255; 64 * 64], 64, 64);
        let region = FaceRegion { x: 8, y: 8, width: 32, height: 32 };
        let patch = face_patch(&frame, &region).unwrap();
        assert_eq!(patch.values().len(), PATCH_SIZE * PATCH_SIZE);
        assert!(patch.values().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_face_patch_range() {
        let data: Vec<u8> = (0..64 * 64).map(|i| (i % 256) as u8).collect();
        let frame = gray(data, 64, 64);
        let region = FaceRegion { x: 0, y: 0, width: 64, height: 64 };
        let patch = face_patch(&frame, &region).unwrap();
        assert!(patch.values().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
