//! 二维切片的重采样, 基于 [`image::imageops::resize`].
//!
//! 扫描切片使用 [`FilterType::Triangle`] (双线性), 标签切片使用 [`FilterType::Nearest`].
//! `image` 对浮点像素的重采样结果会被夹到 `[0, 1]`, 因此扫描切片在重采样前先按自身的
//! 取值范围线性映射到 `[0, 1]`, 重采样后再映射回去. 三角滤波的权重非负且和为 1,
//! 所以这一映射不会改变结果.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Primitive};
use ndarray::{Array2, ArrayView2};

use crate::Idx2d;

/// `(H, W)` 数组 -> 宽 `W` 高 `H` 的单通道图像.
fn to_luma<T: Primitive>(src: ArrayView2<T>, f: impl Fn(T) -> T) -> ImageBuffer<Luma<T>, Vec<T>> {
    let (h, w) = src.dim();
    ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
        Luma([f(src[(y as usize, x as usize)])])
    })
}

/// 单通道图像 -> `(H, W)` 数组.
fn from_luma<T: Primitive>(img: &ImageBuffer<Luma<T>, Vec<T>>, f: impl Fn(T) -> T) -> Array2<T> {
    let (w, h) = img.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(i, j)| {
        f(img.get_pixel(j as u32, i as u32).0[0])
    })
}

#[inline]
fn check_shapes(src: (usize, usize), shape: Idx2d) {
    assert!(src.0 > 0 && src.1 > 0, "输入图像不能为空");
    assert!(shape.0 > 0 && shape.1 > 0, "输出形状不能为空");
}

/// 双线性重采样, 用于扫描切片.
///
/// 输入为空图像或 `shape` 含 0 时程序 panic.
pub fn resize_bilinear(src: ArrayView2<f32>, shape: Idx2d) -> Array2<f32> {
    check_shapes(src.dim(), shape);
    if src.dim() == shape {
        return src.to_owned();
    }

    let (lo, hi) = src
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = hi - lo;
    if !(span > 0.0) {
        return Array2::from_elem(shape, lo);
    }

    let img = to_luma(src, |v| (v - lo) / span);
    let out = imageops::resize(&img, shape.1 as u32, shape.0 as u32, FilterType::Triangle);
    from_luma(&out, |u| u * span + lo)
}

/// 最近邻重采样, 用于标签切片 (不会产生新的标签值).
///
/// 输入为空图像或 `shape` 含 0 时程序 panic.
pub fn resize_nearest(src: ArrayView2<u8>, shape: Idx2d) -> Array2<u8> {
    check_shapes(src.dim(), shape);
    if src.dim() == shape {
        return src.to_owned();
    }

    let img = to_luma(src, |p| p);
    let out = imageops::resize(&img, shape.1 as u32, shape.0 as u32, FilterType::Nearest);
    from_luma(&out, |p| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identity_shape() {
        let a = array![[1.0f32, 2.0], [3.0, 4.0]];
        assert_eq!(resize_bilinear(a.view(), (2, 2)), a);
        let m = array![[0u8, 1], [1, 0]];
        assert_eq!(resize_nearest(m.view(), (2, 2)), m);
    }

    #[test]
    fn test_constant_is_preserved() {
        let a = Array2::from_elem((7, 13), -0.25f32);
        let r = resize_bilinear(a.view(), (32, 32));
        assert_eq!(r.dim(), (32, 32));
        assert!(r.iter().all(|&v| v == -0.25));
    }

    #[test]
    fn test_bilinear_keeps_negative_range() {
        // 归一化后的 HU 值可以为负
        let a = Array2::from_shape_fn((5, 5), |(i, j)| (i * 5 + j) as f32 / 12.0 - 1.0);
        for shape in [(17, 9), (3, 2), (256, 256)] {
            let r = resize_bilinear(a.view(), shape);
            assert_eq!(r.dim(), shape);
            assert!(r.iter().all(|&v| (-1.0 - 1e-4..=1.0 + 1e-4).contains(&v)));
            assert!(r.iter().any(|&v| v < -0.5));
        }
    }

    #[test]
    fn test_bilinear_is_monotone_along_gradient() {
        let a = Array2::from_shape_fn((4, 8), |(_, j)| j as f32);
        let r = resize_bilinear(a.view(), (4, 16));
        for row in r.rows() {
            assert!(row.windows(2).into_iter().all(|w| w[0] <= w[1] + 1e-5));
        }
    }

    #[test]
    fn test_nearest_keeps_labels() {
        let a = array![[0u8, 1], [1, 0]];
        for shape in [(8, 8), (3, 5), (1, 1)] {
            let r = resize_nearest(a.view(), shape);
            assert_eq!(r.dim(), shape);
            assert!(r.iter().all(|&v| v == 0 || v == 1));
        }
        let r = resize_nearest(a.view(), (8, 8));
        assert_eq!(r[(0, 0)], 0);
        assert_eq!(r[(0, 7)], 1);
        assert_eq!(r[(7, 0)], 1);
    }
}
