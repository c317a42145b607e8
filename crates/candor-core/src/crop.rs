//! Grayscale resampling shared by the detector (letterbox) and the emotion
//! classifier (face crops).

use crate::frame::Frame;
use crate::types::FaceBox;

/// Resize a `width × height` luma buffer to `new_w × new_h` with bilinear
/// interpolation (pixel-center aligned).
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return out;
    }

    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
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

            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Cut `face` out of `frame` and resample it to `size × size`.
///
/// `face` must lie inside the frame (as produced by [`FaceBox::clipped`]).
pub fn crop_face(frame: &Frame, face: &FaceBox, size: usize) -> Vec<u8> {
    let w = face.width as usize;
    let h = face.height as usize;
    let mut region = Vec::with_capacity(w * h);
    for y in face.y as usize..face.y as usize + h {
        for x in face.x as usize..face.x as usize + w {
            region.push(frame.pixel(x, y));
        }
    }
    resize_bilinear(&region, w, h, size, size)
}
