//! 训练时的几何数据增强.

use ndarray::{Array2, ArrayView2};
use rand::{Rng, RngCore};

use super::{Augment, Sample};

/// 以图像中心为原点的随机缩放 + 旋转.
///
/// 扫描切片使用双线性插值, 掩膜使用最近邻插值 (保持二值);
/// 超出原图范围的位置填 0.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RandomAffine {
    /// 缩放比例的取值区间 \[min, max\].
    pub scale: (f32, f32),

    /// 旋转角度 (度) 的取值区间 \[min, max\].
    pub rotate: (f32, f32),
}

impl Default for RandomAffine {
    /// 缩放 0.85 ~ 1.15, 旋转 -45° ~ 45°.
    fn default() -> Self {
        Self {
            scale: (0.85, 1.15),
            rotate: (-45.0, 45.0),
        }
    }
}

/// 由输出像素坐标得到输入像素坐标的逆变换.
#[derive(Copy, Clone, Debug)]
struct InverseAffine {
    center: (f32, f32),
    cos: f32,
    sin: f32,
    inv_scale: f32,
}

impl InverseAffine {
    fn new((h, w): (usize, usize), scale: f32, degrees: f32) -> Self {
        let rad = degrees.to_radians();
        Self {
            center: ((h as f32 - 1.0) / 2.0, (w as f32 - 1.0) / 2.0),
            cos: rad.cos(),
            sin: rad.sin(),
            inv_scale: 1.0 / scale,
        }
    }

    /// 输出 `(i, j)` 对应的输入坐标 `(y, x)`.
    #[inline]
    fn map(&self, i: usize, j: usize) -> (f32, f32) {
        let (cy, cx) = self.center;
        let (dy, dx) = (i as f32 - cy, j as f32 - cx);
        // 逆旋转 + 逆缩放
        let y = (self.cos * dy - self.sin * dx) * self.inv_scale;
        let x = (self.sin * dy + self.cos * dx) * self.inv_scale;
        (y + cy, x + cx)
    }
}

/// 双线性采样, 越界位置 (按像素邻域) 视为 0.
fn sample_bilinear(src: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = src.dim();
    let (y0, x0) = (y.floor(), x.floor());
    let (dy, dx) = (y - y0, x - x0);
    let at = |yy: f32, xx: f32| -> f32 {
        if yy < 0.0 || xx < 0.0 || yy >= h as f32 || xx >= w as f32 {
            0.0
        } else {
            src[(yy as usize, xx as usize)]
        }
    };
    let top = at(y0, x0) * (1.0 - dx) + at(y0, x0 + 1.0) * dx;
    let bottom = at(y0 + 1.0, x0) * (1.0 - dx) + at(y0 + 1.0, x0 + 1.0) * dx;
    top * (1.0 - dy) + bottom * dy
}

/// 最近邻采样, 越界位置视为 0.
fn sample_nearest(src: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = src.dim();
    let (y, x) = (y.round(), x.round());
    if y < 0.0 || x < 0.0 || y >= h as f32 || x >= w as f32 {
        0.0
    } else {
        src[(y as usize, x as usize)]
    }
}

impl RandomAffine {
    /// 以确定的缩放比例和旋转角度变换样本.
    pub fn transform(sample: &Sample, scale: f32, degrees: f32) -> Sample {
        let sh = sample.shape();
        let inv = InverseAffine::new(sh, scale, degrees);
        let (image, mask) = (sample.image.view(), sample.mask.view());

        let image = Array2::from_shape_fn(sh, |(i, j)| {
            let (y, x) = inv.map(i, j);
            sample_bilinear(&image, y, x)
        });
        let mask = Array2::from_shape_fn(sh, |(i, j)| {
            let (y, x) = inv.map(i, j);
            sample_nearest(&mask, y, x)
        });
        Sample { image, mask }
    }
}

impl Augment for RandomAffine {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample {
        assert!(self.scale.0 > 0.0 && self.scale.0 <= self.scale.1, "缩放区间非法");
        assert!(self.rotate.0 <= self.rotate.1, "旋转区间非法");
        let scale = rng.gen_range(self.scale.0..=self.scale.1);
        let degrees = rng.gen_range(self.rotate.0..=self.rotate.1);
        Self::transform(&sample, scale, degrees)
    }
}
