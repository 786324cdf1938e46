//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 原 Task06 Lung 数据集中, 背景的像素值.
    pub const LUNG_BACKGROUND: u8 = 0;

    /// 原 Task06 Lung 数据集中, 肿瘤的像素值.
    pub const LUNG_TUMOR: u8 = 1;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是肿瘤?
    ///
    /// 任何非背景值都视为肿瘤, 以兼容重采样后出现的非 0/1 标签.
    #[inline]
    pub const fn is_tumor(p: u8) -> bool {
        !is_background(p)
    }

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, LUNG_BACKGROUND)
    }
}

/// 三通道颜色, 用于叠加可视化.
pub mod rgb {
    /// 真值掩膜的叠加颜色 (红).
    pub const TRUTH: [u8; 3] = [230, 40, 40];

    /// 预测掩膜的叠加颜色 (绿).
    pub const PREDICTION: [u8; 3] = [40, 220, 90];

    /// 掩膜叠加时的不透明度.
    pub const OVERLAY_ALPHA: f32 = 0.5;
}

/// 模型输入切片的固定分辨率 (高, 宽).
pub const SLICE_SHAPE: crate::Idx2d = (256, 256);

/// CT HU 值归一化因子. 预处理时所有 HU 值都会除以该值.
pub const HU_SCALE: f32 = 3071.0;

/// 预处理时丢弃的起始水平切片个数 (这部分切片通常不包含肺部).
pub const SKIP_LEADING_SLICES: usize = 30;

/// 划入验证集的病例个数 (按名称排序后取最后若干个).
pub const VAL_CASES: usize = 6;

/// 每隔多少个 step 输出一次可视化结果.
pub const LOG_EVERY_N_STEPS: u64 = 50;

/// 二值化阈值的默认值.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Adam 优化器的默认学习率.
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;

/// 默认保留的最优 checkpoint 个数.
pub const DEFAULT_TOP_K: usize = 30;

/// 像素类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElemType {
    /// `LUNG_BACKGROUND`, 代表背景.
    Background,

    /// `LUNG_TUMOR`, 代表前景.
    Foreground,
}

impl ElemType {
    /// 是否为前景.
    #[inline]
    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Foreground)
    }

    /// 是否为背景.
    #[inline]
    pub fn is_background(&self) -> bool {
        !self.is_foreground()
    }

    /// 由二值化后的像素值判断类型.
    #[inline]
    pub fn from_pixel(p: u8) -> Self {
        if gray::is_tumor(p) {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}
