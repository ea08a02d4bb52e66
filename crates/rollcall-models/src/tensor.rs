//! RGB image → NCHW float tensor packing shared by all three models.

use image::RgbImage;
use ndarray::Array4;

/// Write `image` into `tensor[0, c, y + off_y, x + off_x]` as `(p - mean) / std`.
///
/// Pixels falling outside the tensor are dropped.
pub(crate) fn write_nchw(
    tensor: &mut Array4<f32>,
    image: &RgbImage,
    off_x: usize,
    off_y: usize,
    mean: f32,
    std: f32,
) {
    let (_, _, th, tw) = tensor.dim();
    for (x, y, pixel) in image.enumerate_pixels() {
        let tx = x as usize + off_x;
        let ty = y as usize + off_y;
        if tx >= tw || ty >= th {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - mean) / std;
        }
    }
}

/// Pack an image into a fresh `1x3xHxW` tensor of its own size.
pub(crate) fn to_nchw(image: &RgbImage, mean: f32, std: f32) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    write_nchw(&mut tensor, image, 0, 0, mean, std);
    tensor
}
