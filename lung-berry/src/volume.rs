//! 整个 3D 扫描的逐切片推理与渲染.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use image::ImageResult;
use ndarray::{Array2, ArrayView3, Axis};

use crate::consts::{gray, rgb, DEFAULT_THRESHOLD, SLICE_SHAPE};
use crate::data::resize::resize_bilinear;
use crate::figure;
use crate::model::{predict, SegModel};
use crate::score::sigmoid;
use crate::task::ModelState;
use crate::{CtScan, CtWindow, Idx2d};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 逐切片推理结果. 两个序列等长, 且与输入切片一一对应.
#[derive(Clone, Debug, Default)]
pub struct VolumeSegmentation {
    /// 缩放到模型分辨率的扫描切片.
    pub slices: Vec<Array2<f32>>,

    /// 二值掩膜, 取值为 [`gray::LUNG_BACKGROUND`] 或 [`gray::LUNG_TUMOR`].
    pub masks: Vec<Array2<u8>>,
}

impl VolumeSegmentation {
    /// 切片个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// 含肿瘤的切片序号.
    pub fn tumor_slices(&self) -> Vec<usize> {
        self.masks
            .iter()
            .enumerate()
            .filter(|(_, m)| m.iter().any(|&p| gray::is_tumor(p)))
            .map(|(i, _)| i)
            .collect()
    }
}

/// 沿 z 轴 (第 0 维) 逐切片应用二维模型.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VolumeSegmenter {
    target: Idx2d,
    threshold: f32,
}

impl Default for VolumeSegmenter {
    /// 256x256, 阈值 0.5.
    fn default() -> Self {
        Self::new(SLICE_SHAPE, DEFAULT_THRESHOLD)
    }
}

impl VolumeSegmenter {
    /// 指定模型分辨率和二值化阈值.
    ///
    /// # 注意
    ///
    /// `target` 的两维都必须为正, `threshold` 必须位于 `[0, 1)`, 否则程序 panic.
    pub fn new(target: Idx2d, threshold: f32) -> Self {
        assert!(target.0 > 0 && target.1 > 0, "目标分辨率必须为正");
        assert!((0.0..1.0).contains(&threshold), "阈值必须位于 [0, 1)");
        Self { target, threshold }
    }

    /// 模型分辨率.
    #[inline]
    pub fn target(&self) -> Idx2d {
        self.target
    }

    /// 二值化阈值.
    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 单个已缩放的切片: 推理, 二值化.
    fn mask_slice<B: Backend, M: SegModel<B>>(
        &self,
        model: &M,
        resized: &Array2<f32>,
        device: &B::Device,
    ) -> Array2<u8> {
        let input = resized.view().insert_axis(Axis(0)).insert_axis(Axis(0));
        predict::<B, _>(model, input, device)
            .index_axis(Axis(0), 0)
            .index_axis(Axis(0), 0)
            .mapv(|x| {
                if sigmoid(x) > self.threshold {
                    gray::LUNG_TUMOR
                } else {
                    gray::LUNG_BACKGROUND
                }
            })
    }

    /// 对已经归一化到训练数据范围的 `(z, H, W)` 体数据逐切片推理.
    ///
    /// 缩放可以并行; 推理在不追踪梯度的后端上按顺序逐切片进行.
    pub fn segment<B, M>(&self, state: &ModelState<B, M>, volume: ArrayView3<f32>) -> VolumeSegmentation
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: SegModel<B::InnerBackend>,
    {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let slices: Vec<Array2<f32>> = volume
                    .axis_iter(Axis(0))
                    .into_par_iter()
                    .map(|s| resize_bilinear(s, self.target))
                    .collect();
            } else {
                let slices: Vec<Array2<f32>> = volume
                    .axis_iter(Axis(0))
                    .map(|s| resize_bilinear(s, self.target))
                    .collect();
            }
        }
        let model = state.model.valid();
        let masks = slices
            .iter()
            .map(|s| self.mask_slice::<B::InnerBackend, _>(&model, s, &state.device))
            .collect();
        VolumeSegmentation { slices, masks }
    }

    /// 对原始 HU 值的扫描推理. 先以 `hu_scale` 归一化.
    pub fn segment_scan<B, M>(&self, state: &ModelState<B, M>, scan: &CtScan, hu_scale: f32) -> VolumeSegmentation
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: SegModel<B::InnerBackend>,
    {
        let volume = scan.normalized(hu_scale);
        self.segment(state, volume.view())
    }
}

/// 把推理结果逐帧写入 `dir/{i:04}.png`: 灰度扫描上以半透明绿色叠加预测掩膜.
///
/// 返回按顺序排列的帧路径.
pub fn render_frames<P: AsRef<Path>>(
    seg: &VolumeSegmentation,
    dir: P,
    window: CtWindow,
) -> ImageResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut frames = Vec::with_capacity(seg.len());
    for (i, (slice, mask)) in seg.slices.iter().zip(&seg.masks).enumerate() {
        let mask = mask.mapv(|p| if gray::is_tumor(p) { 1.0 } else { 0.0 });
        let frame = figure::overlay(slice.view(), mask.view(), rgb::PREDICTION, window);
        let path = dir.join(format!("{i:04}.png"));
        frame.save(&path)?;
        frames.push(path);
    }
    Ok(frames)
}
