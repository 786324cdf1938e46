//! 验证集整体评估.
//!
//! 逐个样本推理 (batch 大小为 1, 按顺序, 不重采样), 最后把全部预测与全部真值
//! 各自拼成一个大张量, 计算一次 Dice. 这是整体 (corpus-level) 的重叠度,
//! 而不是逐样本 Dice 的平均: 整体假阳性对结果的影响更大, 这是有意为之.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{Array1, Axis};

use crate::dataset::SliceDataset;
use crate::error::{RunError, ShapeMismatchError};
use crate::model::{predict, SegModel};
use crate::score::{binarize_logit, dice_score, sigmoid};
use crate::task::ModelState;
use crate::Split;

/// 预测的取值方式.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum EvalMode {
    /// sigmoid 概率, Dice 的交集为 "软与".
    #[default]
    Soft,

    /// 以给定阈值二值化后的硬预测.
    Hard(f32),
}

impl EvalMode {
    #[inline]
    fn apply(&self, logit: f32) -> f32 {
        match *self {
            Self::Soft => sigmoid(logit),
            Self::Hard(threshold) => binarize_logit(logit, threshold),
        }
    }
}

/// 评估结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EvalReport {
    /// 整体 Dice.
    pub dice: f64,

    /// 样本个数.
    pub samples: usize,

    /// 含肿瘤的样本个数.
    pub positive_samples: usize,
}

/// 在 `dataset` 上评估模型. 在不追踪梯度的后端上执行, 不修改模型状态.
pub fn evaluate<B, M, D>(
    state: &ModelState<B, M>,
    dataset: &D,
    mode: EvalMode,
) -> Result<EvalReport, RunError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: SegModel<B::InnerBackend>,
    D: SliceDataset + ?Sized,
{
    let split = Split::Val;
    if dataset.is_empty() {
        return Err(RunError::EmptyDataset(split));
    }

    let model = state.model.valid();
    let mut predictions = Vec::new();
    let mut labels = Vec::new();
    let mut positive_samples = 0;
    for index in 0..dataset.len() {
        let sample = dataset
            .get(index)
            .map_err(|e| RunError::Dataset(split, e))?;
        positive_samples += usize::from(sample.label());

        let image = sample.image.view().insert_axis(Axis(0)).insert_axis(Axis(0));
        let logits = predict::<B::InnerBackend, _>(&model, image, &state.device);
        let (h, w) = sample.mask.dim();
        if logits.shape() != [1, 1, h, w] {
            let e = ShapeMismatchError::new(&[1, 1, h, w], logits.shape());
            return Err(RunError::Shape(split, e));
        }
        predictions.extend(logits.iter().map(|&x| mode.apply(x)));
        labels.extend(sample.mask.iter().copied());
    }

    let predictions = Array1::from_vec(predictions);
    let labels = Array1::from_vec(labels);
    let dice = dice_score(&predictions, &labels)
        .map_err(|e| RunError::Shape(split, e))?;
    log::info!(
        "评估完成: {} 个样本 ({} 个含肿瘤), Dice = {dice:.4}",
        dataset.len(),
        positive_samples
    );
    Ok(EvalReport {
        dice,
        samples: dataset.len(),
        positive_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, Sample};
    use crate::model::{ShallowConvNet, TrainBackend};
    use crate::optim::AdamOptimizer;
    use crate::score::EMPTY_AGREEMENT;
    use burn::module::Module;
    use burn::tensor::backend::Backend;
    use burn::tensor::Tensor;
    use ndarray::Array2;

    type Net = ShallowConvNet<TrainBackend>;

    /// 输出恒为 `b2` 的模型.
    fn constant(logit: f32) -> ModelState<TrainBackend, Net> {
        let device = Default::default();
        let mut params = vec![0.0; Net::param_count(1)];
        params[11] = logit;
        let model = Net::from_params(1, &params, &device);
        ModelState::new(model, AdamOptimizer::default(), device)
    }

    /// 输出少一行的模型.
    #[derive(Module, Debug)]
    struct Cropped<B: Backend> {
        inner: ShallowConvNet<B>,
    }

    impl<B: Backend> SegModel<B> for Cropped<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
            let [n, c, h, w] = images.dims();
            self.inner.forward(images).slice([0..n, 0..c, 0..h - 1, 0..w])
        }
    }

    fn empty_masks(n: usize) -> InMemoryDataset {
        (0..n)
            .map(|i| Sample::new(Array2::from_elem((4, 4), i as f32), Array2::zeros((4, 4))).unwrap())
            .collect()
    }

    #[test]
    fn test_all_empty_uses_fixed_policy() {
        let ds = empty_masks(5);
        let state = constant(-1e4);
        for mode in [EvalMode::Hard(0.5), EvalMode::Soft] {
            let first = evaluate(&state, &ds, mode).unwrap();
            let second = evaluate(&state, &ds, mode).unwrap();
            assert_eq!(first.samples, 5);
            assert_eq!(first.positive_samples, 0);
            assert_eq!(first.dice, EMPTY_AGREEMENT);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_corpus_level() {
        // 样本 0: 真值 1 个像素, 预测全阳性 (16 个); 样本 1: 全阴性.
        let mut mask = Array2::zeros((4, 4));
        mask[(0, 0)] = 1.0;
        let ds = InMemoryDataset::new(vec![
            Sample::new(Array2::zeros((4, 4)), mask).unwrap(),
            Sample::new(Array2::zeros((4, 4)), Array2::zeros((4, 4))).unwrap(),
        ]);
        let state = constant(10.0);
        let report = evaluate(&state, &ds, EvalMode::Hard(0.5)).unwrap();
        // 2 * 1 / (32 + 1)
        assert!((report.dice - 2.0 / 33.0).abs() < 1e-12);
        assert_eq!(report.positive_samples, 1);
    }

    #[test]
    fn test_empty_dataset() {
        let ds = InMemoryDataset::default();
        assert!(matches!(
            evaluate(&constant(0.0), &ds, EvalMode::Soft),
            Err(RunError::EmptyDataset(Split::Val))
        ));
    }

    #[test]
    fn test_output_shape_mismatch_is_tagged_val() {
        let device = Default::default();
        let model = Cropped {
            inner: Net::new(1, 0, &device),
        };
        let state = ModelState::<TrainBackend, _>::new(model, AdamOptimizer::default(), device);
        let ds = empty_masks(2);
        match evaluate(&state, &ds, EvalMode::Soft) {
            Err(RunError::Shape(Split::Val, e)) => {
                assert_eq!(e.expected, vec![1, 1, 4, 4]);
                assert_eq!(e.found, vec![1, 1, 3, 4]);
            }
            other => panic!("{other:?}"),
        }
    }
}
