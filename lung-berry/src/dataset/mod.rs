//! 数据集操作.
//!
//! 核心训练流程只依赖 [`SliceDataset`] 的随机访问接口:
//! `len()` 与 `get(index) -> (image, mask)`. 具体的存储方式
//! (预处理后的 npy 切片目录, 内存数组) 由各实现自行决定.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::RngCore;

use crate::consts::gray::is_tumor;
use crate::error::{DatasetError, ShapeMismatchError};
use crate::Idx2d;

pub mod augment;
mod memory;
mod npy_slices;
pub mod task06;

pub use augment::RandomAffine;
pub use memory::InMemoryDataset;
pub use npy_slices::NpySliceDataset;

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 数据划分.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    /// 训练集. 使用加权采样, 参数会被更新.
    Train,

    /// 验证集. 按固定顺序完整遍历一次, 不更新参数.
    Val,
}

impl Split {
    /// 预处理输出目录中该划分对应的子目录名.
    #[inline]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("Train"),
            Split::Val => f.write_str("Val"),
        }
    }
}

/// 一个训练样本: 归一化的扫描切片和同分辨率的二值掩膜.
///
/// 掩膜取值为 `0.0` 或 `1.0`, 可直接作为交叉熵的目标.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// 单通道归一化扫描切片.
    pub image: Array2<f32>,

    /// 单通道二值掩膜.
    pub mask: Array2<f32>,
}

impl Sample {
    /// 构建样本. 扫描与掩膜分辨率不一致时返回 `Err`.
    pub fn new(image: Array2<f32>, mask: Array2<f32>) -> Result<Self, ShapeMismatchError> {
        if image.dim() != mask.dim() {
            return Err(ShapeMismatchError::new(image.shape(), mask.shape()));
        }
        Ok(Self { image, mask })
    }

    /// 由 `u8` 标签构建样本, 任何非背景值都视为肿瘤.
    pub fn from_label(image: Array2<f32>, label: &Array2<u8>) -> Result<Self, ShapeMismatchError> {
        Self::new(image, label.mapv(|p| if is_tumor(p) { 1.0 } else { 0.0 }))
    }

    /// 切片分辨率 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.image.dim()
    }

    /// 类别标签: 掩膜是否至少包含一个正像素. 每次调用都会重新计算.
    #[inline]
    pub fn label(&self) -> bool {
        self.mask.iter().any(|&p| p > 0.0)
    }
}

/// 训练时的数据增强算子. 每次访问样本时都会重新随机.
pub trait Augment: Send + Sync {
    /// 对样本做随机变换. 扫描和掩膜必须经历同一个几何变换.
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample;
}

/// 可随机访问的二维切片数据集.
///
/// 同一个数据集中所有样本的分辨率必须一致.
pub trait SliceDataset: Sync {
    /// 样本个数.
    fn len(&self) -> usize;

    /// 是否为空.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取第 `index` 个样本. 越界时返回 [`DatasetError::IndexOutOfRange`].
    fn get(&self, index: usize) -> Result<Sample, DatasetError>;

    /// 第 `index` 个样本的类别标签 (是否含肿瘤).
    ///
    /// 默认实现读取整个样本; 带数据增强的实现应当覆写该方法,
    /// 使标签取自未增强的掩膜.
    fn class_label(&self, index: usize) -> Result<bool, DatasetError> {
        Ok(self.get(index)?.label())
    }
}

impl<D: SliceDataset + ?Sized> SliceDataset for &D {
    #[inline]
    fn len(&self) -> usize {
        (**self).len()
    }

    #[inline]
    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        (**self).get(index)
    }

    #[inline]
    fn class_label(&self, index: usize) -> Result<bool, DatasetError> {
        (**self).class_label(index)
    }
}
