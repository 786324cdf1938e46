//! 图像的持久化存储.

use crate::{CtWindow, LabelSlice, ScanSlice};
use image::ImageResult;
use ndarray::ArrayView2;
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// `ImgWriteVis` trait 的意图是, 图像将以 "可视化友好"
/// 的方式保存, 而不是 "as is" 的方式. 这意味着, 对于 `LabelSlice`
/// 这类仅存在 0, 1 像素值的图像, 在保存时会映射为黑白图像;
/// 对于 `ScanSlice` 这类以 CT HU 值存储的扫描,
/// 在保存时会用常见的肺部可视化窗口规范化.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 使像素更有利于单通道可视化.
#[inline]
fn pretty(label: u8) -> u8 {
    use crate::consts::gray::*;
    if is_tumor(label) {
        WHITE
    } else {
        BLACK
    }
}

/// 以 `window` 将 `data` 映射为 8-bit 灰度图并保存到 `path`.
///
/// 非有限值 (NaN, inf) 被画为黑色.
fn save_gray<P: AsRef<Path>>(
    data: ArrayView2<f32>,
    window: CtWindow,
    path: P,
) -> ImageResult<()> {
    let (height, width) = data.dim();
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for ((h, w), &v) in data.indexed_iter() {
        let gray = window.eval(v).unwrap_or(0);
        buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
    }
    buf.save(path)
}

/// 背景为黑色, 肿瘤为白色.
impl ImgWriteVis for LabelSlice<'_> {
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (height, width) = self.shape();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in self.indexed_iter() {
            buf.put_pixel(w as u32, h as u32, image::Luma([pretty(pix)]));
        }
        buf.save(path)
    }
}

/// 窗位 -600, 窗宽 1500.
impl ImgWriteVis for ScanSlice<'_> {
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        const WINDOW: CtWindow = CtWindow::from_lung_visual();
        save_gray(self.data(), WINDOW, path)
    }
}
