//! Dice 重叠系数.
//!
//! `dice = 2 * sum(p * t) / (sum(p) + sum(t))`.
//!
//! 预测可以是二值掩膜, 也可以是 `[0, 1]` 内的概率 (此时交集是 "软与").
//! 两个张量只要求元素总数相同; 计算时按各自的逻辑顺序展平.
//!
//! # 分母为零
//!
//! 预测与真值全为 0 时 `0 / 0` 无定义. 这里固定返回 [`EMPTY_AGREEMENT`] (`1.0`):
//! 两者一致地认为 "没有肿瘤", 视为完全吻合. 该约定保证结果确定且不会有 NaN
//! 混入汇总指标.

use ndarray::{ArrayBase, Data, Dimension};

use crate::error::ShapeMismatchError;

/// 预测与真值都为空时的 Dice 值.
pub const EMPTY_AGREEMENT: f64 = 1.0;

/// Dice 的三个累加量. 可以跨多个张量累加, 得到整体 (而非逐样本平均) 的 Dice.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DiceParts {
    /// `sum(p * t)`.
    pub intersection: f64,

    /// `sum(p)`.
    pub pred_sum: f64,

    /// `sum(t)`.
    pub truth_sum: f64,
}

impl DiceParts {
    /// 累加一对展平后的序列.
    pub fn accumulate<I, J>(&mut self, pred: I, truth: J)
    where
        I: IntoIterator<Item = f32>,
        J: IntoIterator<Item = f32>,
    {
        for (p, t) in pred.into_iter().zip(truth) {
            let (p, t) = (p as f64, t as f64);
            self.intersection += p * t;
            self.pred_sum += p;
            self.truth_sum += t;
        }
    }

    /// 合并两组累加量.
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        Self {
            intersection: self.intersection + other.intersection,
            pred_sum: self.pred_sum + other.pred_sum,
            truth_sum: self.truth_sum + other.truth_sum,
        }
    }

    /// 由累加量计算 Dice.
    #[inline]
    pub fn score(&self) -> f64 {
        let denom = self.pred_sum + self.truth_sum;
        if denom == 0.0 {
            EMPTY_AGREEMENT
        } else {
            2.0 * self.intersection / denom
        }
    }
}

/// 计算 `pred` 与 `truth` 的 Dice 系数.
///
/// 元素总数不同则返回 `Err`.
pub fn dice_score<S, T, D, E>(
    pred: &ArrayBase<S, D>,
    truth: &ArrayBase<T, E>,
) -> Result<f64, ShapeMismatchError>
where
    S: Data<Elem = f32>,
    T: Data<Elem = f32>,
    D: Dimension,
    E: Dimension,
{
    if pred.len() != truth.len() {
        return Err(ShapeMismatchError::new(pred.shape(), truth.shape()));
    }
    let mut parts = DiceParts::default();
    parts.accumulate(pred.iter().copied(), truth.iter().copied());
    Ok(parts.score())
}

/// 数值稳定的 sigmoid.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// logit 阈值化: `sigmoid(x) > threshold` 时为 `1.0`, 否则为 `0.0`.
#[inline]
pub fn binarize_logit(x: f32, threshold: f32) -> f32 {
    if sigmoid(x) > threshold {
        1.0
    } else {
        0.0
    }
}
