//! 运行时错误.
//!
//! 采样、打分相关的错误属于结构性错误 (配置或数据问题), 不应重试;
//! 上层应当终止运行, 并借助 [`RunError`] 标明出错的数据划分.

use std::fmt;
use std::io;

use crate::Split;

/// 训练集中不存在任何正样本 (含肿瘤切片), 无法计算类别不平衡比例.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegenerateDatasetError {
    /// 负样本 (全背景切片) 个数.
    pub negatives: usize,
}

impl fmt::Display for DegenerateDatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "数据集中没有正样本 ({} 个负样本), 类别比例无定义",
            self.negatives
        )
    }
}

impl std::error::Error for DegenerateDatasetError {}

/// 两个张量的形状不一致.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatchError {
    /// 期望形状.
    pub expected: Vec<usize>,

    /// 实际形状.
    pub found: Vec<usize>,
}

impl ShapeMismatchError {
    /// 由两个形状切片构建.
    #[inline]
    pub fn new(expected: &[usize], found: &[usize]) -> Self {
        Self {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

impl fmt::Display for ShapeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "形状不一致: 期望 {:?}, 实际 {:?}", self.expected, self.found)
    }
}

impl std::error::Error for ShapeMismatchError {}

/// 单个训练/验证 step 的错误.
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// 模型输出与掩膜形状不一致. 此时不会发生任何参数更新.
    ShapeMismatch(ShapeMismatchError),

    /// 损失为 NaN 或无穷大. 通常意味着学习率或数据存在系统性问题.
    NonFiniteLoss {
        /// 所处阶段.
        phase: Split,

        /// 全局 step.
        step: u64,

        /// 损失值.
        loss: f32,
    },
}

impl From<ShapeMismatchError> for StepError {
    #[inline]
    fn from(e: ShapeMismatchError) -> Self {
        Self::ShapeMismatch(e)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch(e) => write!(f, "模型输出与掩膜不匹配: {e}"),
            Self::NonFiniteLoss { phase, step, loss } => {
                write!(f, "{phase} 阶段第 {step} 步损失非有限值: {loss}")
            }
        }
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ShapeMismatch(e) => Some(e),
            Self::NonFiniteLoss { .. } => None,
        }
    }
}

/// 读取切片数据集的错误.
#[derive(Debug)]
pub enum DatasetError {
    /// 底层 I/O 错误.
    Io(io::Error),

    /// 读取 npy 文件错误.
    ReadNpy(ndarray_npy::ReadNpyError),

    /// 写入 npy 文件错误.
    WriteNpy(ndarray_npy::WriteNpyError),

    /// 读取 nifti 文件错误.
    Nifti(nifti::NiftiError),

    /// 写入预览图像错误.
    Image(image::ImageError),

    /// 索引越界. 参数依次为索引和数据集长度.
    IndexOutOfRange(usize, usize),

    /// 同一样本的扫描与掩膜形状不一致.
    InconsistentShape(ShapeMismatchError),

    /// 病例数不足以划分出非空的训练集.
    TooFewCases {
        /// 找到的病例数.
        found: usize,

        /// 要求的验证集病例数.
        val: usize,
    },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O 错误: {e}"),
            Self::ReadNpy(e) => write!(f, "读取 npy 失败: {e}"),
            Self::WriteNpy(e) => write!(f, "写入 npy 失败: {e}"),
            Self::Nifti(e) => write!(f, "读取 nifti 失败: {e}"),
            Self::Image(e) => write!(f, "写入预览图像失败: {e}"),
            Self::IndexOutOfRange(i, len) => write!(f, "索引 {i} 越界 (长度 {len})"),
            Self::InconsistentShape(e) => write!(f, "扫描与掩膜不一致: {e}"),
            Self::TooFewCases { found, val } => {
                write!(f, "只找到 {found} 个病例, 划出 {val} 个验证病例后训练集为空")
            }
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::ReadNpy(e) => Some(e),
            Self::WriteNpy(e) => Some(e),
            Self::Nifti(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::InconsistentShape(e) => Some(e),
            Self::IndexOutOfRange(..) | Self::TooFewCases { .. } => None,
        }
    }
}

impl From<image::ImageError> for DatasetError {
    #[inline]
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<io::Error> for DatasetError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ndarray_npy::ReadNpyError> for DatasetError {
    #[inline]
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        Self::ReadNpy(e)
    }
}

impl From<ndarray_npy::WriteNpyError> for DatasetError {
    #[inline]
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::WriteNpy(e)
    }
}

impl From<nifti::NiftiError> for DatasetError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

/// 组装 batch 的错误.
#[derive(Debug)]
pub enum LoadError {
    /// 读取样本失败.
    Dataset(DatasetError),

    /// batch 内样本分辨率不一致.
    Collate(ShapeMismatchError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset(e) => write!(f, "{e}"),
            Self::Collate(e) => write!(f, "batch 拼接失败: {e}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(e) => Some(e),
            Self::Collate(e) => Some(e),
        }
    }
}

impl From<DatasetError> for LoadError {
    #[inline]
    fn from(e: DatasetError) -> Self {
        Self::Dataset(e)
    }
}

impl From<ShapeMismatchError> for LoadError {
    #[inline]
    fn from(e: ShapeMismatchError) -> Self {
        Self::Collate(e)
    }
}

/// 读写 checkpoint 的错误.
#[derive(Debug)]
pub enum CheckpointError {
    /// 底层 I/O 错误.
    Io(io::Error),

    /// 序列化/反序列化错误.
    Codec(bincode::Error),

    /// 模型或优化器状态无法编码/解码.
    Record(String),

    /// checkpoint 中的参数个数与模型不一致. 参数依次为期望值和实际值.
    ParamCountMismatch(usize, usize),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "checkpoint I/O 错误: {e}"),
            Self::Codec(e) => write!(f, "checkpoint 编解码错误: {e}"),
            Self::Record(e) => write!(f, "模型状态编解码错误: {e}"),
            Self::ParamCountMismatch(expected, found) => {
                write!(f, "参数个数不一致: 模型 {expected}, checkpoint {found}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Record(_) | Self::ParamCountMismatch(..) => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bincode::Error> for CheckpointError {
    #[inline]
    fn from(e: bincode::Error) -> Self {
        Self::Codec(e)
    }
}

/// 整个训练/评估流程的错误. 任何一种都会终止运行.
#[derive(Debug)]
pub enum RunError {
    /// 某个数据划分没有正样本.
    Degenerate(Split, DegenerateDatasetError),

    /// 某个数据划分读取失败.
    Dataset(Split, DatasetError),

    /// 某个数据划分的 batch 无法拼接.
    Collate(Split, ShapeMismatchError),

    /// 某个数据划分上模型输出的形状与掩膜不一致.
    Shape(Split, ShapeMismatchError),

    /// 训练或验证 step 失败.
    Step(StepError),

    /// checkpoint 读写失败.
    Checkpoint(CheckpointError),

    /// 空数据集.
    EmptyDataset(Split),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degenerate(split, e) => write!(f, "[{split}] {e}"),
            Self::Dataset(split, e) => write!(f, "[{split}] {e}"),
            Self::Collate(split, e) => write!(f, "[{split}] batch 拼接失败: {e}"),
            Self::Shape(split, e) => write!(f, "[{split}] 模型输出与掩膜不匹配: {e}"),
            Self::Step(e) => write!(f, "{e}"),
            Self::Checkpoint(e) => write!(f, "{e}"),
            Self::EmptyDataset(split) => write!(f, "[{split}] 数据集为空"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Degenerate(_, e) => Some(e),
            Self::Dataset(_, e) => Some(e),
            Self::Collate(_, e) => Some(e),
            Self::Shape(_, e) => Some(e),
            Self::Step(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::EmptyDataset(_) => None,
        }
    }
}

impl RunError {
    /// 将 batch 组装错误标注上数据划分.
    pub fn load(split: Split, e: LoadError) -> Self {
        match e {
            LoadError::Dataset(e) => Self::Dataset(split, e),
            LoadError::Collate(e) => Self::Collate(split, e),
        }
    }
}

impl From<StepError> for RunError {
    #[inline]
    fn from(e: StepError) -> Self {
        Self::Step(e)
    }
}

impl From<CheckpointError> for RunError {
    #[inline]
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}
