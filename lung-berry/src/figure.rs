//! 定性可视化: 扫描, 真值叠加, 预测叠加三联图.

use image::{Rgb, RgbImage};
use ndarray::ArrayView2;

use crate::consts::{gray, rgb, ElemType};
use crate::CtWindow;

/// 将二值掩膜的一个像素转换为像素类型. 大于 0.5 视为肿瘤.
#[inline]
fn mask_elem(m: f32) -> ElemType {
    ElemType::from_pixel(if m > 0.5 {
        gray::LUNG_TUMOR
    } else {
        gray::LUNG_BACKGROUND
    })
}

#[inline]
fn blend(base: u8, over: u8, alpha: f32) -> u8 {
    (base as f32 * (1.0 - alpha) + over as f32 * alpha).round() as u8
}

/// 在 `buf` 的 `x_offset` 列处绘制一块面板: `window` 下的灰度扫描,
/// `mask` 给出时以 `color` 半透明叠加.
fn draw_panel(
    buf: &mut RgbImage,
    x_offset: u32,
    image: ArrayView2<f32>,
    mask: Option<(ArrayView2<f32>, [u8; 3])>,
    window: CtWindow,
) {
    for ((h, w), &v) in image.indexed_iter() {
        let g = window.eval(v).unwrap_or(gray::BLACK);
        let mut px = [g, g, g];
        if let Some((mask, color)) = mask {
            if mask_elem(mask[(h, w)]).is_foreground() {
                for c in 0..3 {
                    px[c] = blend(px[c], color[c], rgb::OVERLAY_ALPHA);
                }
            }
        }
        buf.put_pixel(x_offset + w as u32, h as u32, Rgb(px));
    }
}

/// 单块面板: 灰度扫描 + 半透明掩膜.
pub fn overlay(image: ArrayView2<f32>, mask: ArrayView2<f32>, color: [u8; 3], window: CtWindow) -> RgbImage {
    assert_eq!(image.dim(), mask.dim(), "扫描与掩膜分辨率必须一致");
    let (h, w) = image.dim();
    let mut buf = RgbImage::new(w as u32, h as u32);
    draw_panel(&mut buf, 0, image, Some((mask, color)), window);
    buf
}

/// 横向拼接的三联图: 原始扫描 | 真值 (红) | 预测 (绿).
///
/// `prediction` 应当是已经二值化的掩膜.
pub fn comparison(
    image: ArrayView2<f32>,
    truth: ArrayView2<f32>,
    prediction: ArrayView2<f32>,
    window: CtWindow,
) -> RgbImage {
    assert_eq!(image.dim(), truth.dim(), "扫描与真值分辨率必须一致");
    assert_eq!(image.dim(), prediction.dim(), "扫描与预测分辨率必须一致");
    let (h, w) = image.dim();
    let w32 = w as u32;
    let mut buf = RgbImage::new(w32 * 3, h as u32);
    draw_panel(&mut buf, 0, image, None, window);
    draw_panel(&mut buf, w32, image, Some((truth, rgb::TRUTH)), window);
    draw_panel(&mut buf, 2 * w32, image, Some((prediction, rgb::PREDICTION)), window);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_comparison_layout() {
        let image = Array2::<f32>::zeros((2, 3));
        let mut truth = Array2::<f32>::zeros((2, 3));
        truth[(0, 0)] = 1.0;
        let mut pred = Array2::<f32>::zeros((2, 3));
        pred[(1, 2)] = 1.0;

        let window = CtWindow::from_lung_normalized();
        let fig = comparison(image.view(), truth.view(), pred.view(), window);
        assert_eq!(fig.dimensions(), (9, 2));

        let base = *fig.get_pixel(0, 0);
        assert_eq!(base[0], base[1]);
        assert_eq!(base[1], base[2]);

        // 真值面板左上角偏红
        let t = fig.get_pixel(3, 0);
        assert!(t[0] > t[1]);
        assert_eq!(fig.get_pixel(4, 0), &base);

        // 预测面板右下角偏绿
        let p = fig.get_pixel(8, 1);
        assert!(p[1] > p[0]);
        assert_eq!(fig.get_pixel(6, 0), &base);
    }

    #[test]
    fn test_overlay_blend() {
        assert_eq!(blend(0, 200, 0.5), 100);
        assert_eq!(blend(100, 100, 0.5), 100);
        let image = Array2::<f32>::zeros((1, 1));
        let mask = Array2::<f32>::ones((1, 1));
        let fig = overlay(image.view(), mask.view(), [255, 0, 0], CtWindow::from_lung_normalized());
        assert_eq!(fig.dimensions(), (1, 1));
        assert!(fig.get_pixel(0, 0)[0] > fig.get_pixel(0, 0)[1]);
    }
}
