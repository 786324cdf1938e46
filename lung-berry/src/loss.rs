//! 训练目标.
//!
//! 默认目标是直接作用于 logits 的二值交叉熵. Dice 本身只作为诊断指标记录;
//! 若确实需要以重叠度为优化目标, 需要显式选择可微的 [`Criterion::SoftDice`].

use std::fmt;
use std::str::FromStr;

use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Soft Dice 的平滑项.
const SOFT_DICE_SMOOTH: f64 = 1.0;

/// 损失函数.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    /// 数值稳定的 sigmoid + 二值交叉熵, 对全部像素取平均.
    #[default]
    BceWithLogits,

    /// `1 - (2 * sum(p * t) + 1) / (sum(p) + sum(t) + 1)`, 其中 `p = sigmoid(logits)`.
    SoftDice,
}

impl Criterion {
    /// 计算损失, 返回单元素张量. 在自动微分后端上可以直接 `backward`.
    ///
    /// 调用方保证两个张量形状一致.
    pub fn loss<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        debug_assert_eq!(logits.dims(), targets.dims());
        match self {
            // max(x, 0) - x * y + ln(1 + exp(-|x|))
            Self::BceWithLogits => (logits.clone().clamp_min(0.0) - logits.clone() * targets
                + logits.abs().neg().exp().log1p())
            .mean(),
            Self::SoftDice => {
                let p = sigmoid(logits);
                let intersection = (p.clone() * targets.clone()).sum();
                let total = p.sum() + targets.sum();
                (intersection * 2.0 + SOFT_DICE_SMOOTH)
                    .div(total + SOFT_DICE_SMOOTH)
                    .neg()
                    + 1.0
            }
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BceWithLogits => f.write_str("bce"),
            Self::SoftDice => f.write_str("soft-dice"),
        }
    }
}

/// 无法识别的损失函数名.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCriterionError(pub String);

impl fmt::Display for ParseCriterionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知损失函数 `{}` (可选: bce, soft-dice)", self.0)
    }
}

impl std::error::Error for ParseCriterionError {}

impl FromStr for Criterion {
    type Err = ParseCriterionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bce" | "bce-with-logits" => Ok(Self::BceWithLogits),
            "soft-dice" | "dice" => Ok(Self::SoftDice),
            _ => Err(ParseCriterionError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{to_tensor, InferBackend, TrainBackend};
    use burn::tensor::ElementConversion;
    use ndarray::Array4;

    fn value(c: Criterion, x: &Array4<f32>, y: &Array4<f32>) -> f32 {
        let device = Default::default();
        c.loss(
            to_tensor::<InferBackend>(x.view(), &device),
            to_tensor::<InferBackend>(y.view(), &device),
        )
        .into_scalar()
        .elem::<f32>()
    }

    /// 自动微分的梯度与中心差分一致.
    fn finite_diff(c: Criterion, x: &Array4<f32>, y: &Array4<f32>) {
        let device = Default::default();
        let logits = to_tensor::<TrainBackend>(x.view(), &device).require_grad();
        let targets = to_tensor::<TrainBackend>(y.view(), &device);
        let grads = c.loss(logits.clone(), targets).backward();
        let grad: Vec<f32> = logits.grad(&grads).unwrap().into_data().iter::<f32>().collect();

        let eps = 1e-2f32;
        for ((idx, _), g) in x.indexed_iter().zip(grad) {
            let mut plus = x.clone();
            plus[idx] += eps;
            let mut minus = x.clone();
            minus[idx] -= eps;
            let numeric = (value(c, &plus, y) - value(c, &minus, y)) / (2.0 * eps);
            assert!(
                (numeric - g).abs() < 1e-3,
                "{c} {idx:?}: 数值梯度 {numeric}, 自动微分梯度 {g}"
            );
        }
    }

    fn sample() -> (Array4<f32>, Array4<f32>) {
        // 避开 0, |x| 在 0 处不可导
        let x = Array4::from_shape_vec((1, 1, 2, 3), vec![-2.0, -0.5, 0.2, 0.3, 1.5, 4.0]).unwrap();
        let y = Array4::from_shape_vec((1, 1, 2, 3), vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
        (x, y)
    }

    #[test]
    fn test_bce_values() {
        let x = Array4::<f32>::zeros((1, 1, 1, 2));
        let y = Array4::from_shape_vec((1, 1, 1, 2), vec![0.0, 1.0]).unwrap();
        let l = value(Criterion::BceWithLogits, &x, &y);
        assert!((l - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_bce_extreme_logits_are_finite() {
        let device = Default::default();
        let x = Array4::from_shape_vec((1, 1, 1, 4), vec![1e4, -1e4, 1e4, -1e4]).unwrap();
        let y = Array4::from_shape_vec((1, 1, 1, 4), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let logits = to_tensor::<TrainBackend>(x.view(), &device).require_grad();
        let loss = Criterion::BceWithLogits.loss(logits.clone(), to_tensor(y.view(), &device));
        let l = loss.clone().into_scalar().elem::<f32>();
        assert!(l.is_finite());
        assert!((l - 5e3).abs() < 1.0);
        let grads = loss.backward();
        let g = logits.grad(&grads).unwrap();
        assert!(g.into_data().iter::<f32>().all(|v| v.is_finite()));
    }

    #[test]
    fn test_bce_gradient() {
        let (x, y) = sample();
        finite_diff(Criterion::BceWithLogits, &x, &y);
    }

    #[test]
    fn test_soft_dice_gradient() {
        let (x, y) = sample();
        finite_diff(Criterion::SoftDice, &x, &y);
    }

    #[test]
    fn test_soft_dice_range() {
        let (x, y) = sample();
        let l = value(Criterion::SoftDice, &x, &y);
        assert!((0.0..=1.0).contains(&l));
        let perfect = y.mapv(|t| if t > 0.5 { 50.0 } else { -50.0 });
        assert!(value(Criterion::SoftDice, &perfect, &y) < 1e-6);
    }

    #[test]
    fn test_parse() {
        assert_eq!("bce".parse::<Criterion>(), Ok(Criterion::BceWithLogits));
        assert_eq!(" Soft-Dice ".parse::<Criterion>(), Ok(Criterion::SoftDice));
        assert!("l2".parse::<Criterion>().is_err());
        assert_eq!(Criterion::default().to_string(), "bce");
    }
}
