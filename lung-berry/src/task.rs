//! 单步训练/验证.
//!
//! [`TumorSegmentation`] 描述 "一步" 做什么: 前向传播, 计算损失, 记录指标, 训练时更新参数.
//! 模型参数与优化器状态 ([`ModelState`]) 由调用方持有, 显式传入每一步:
//! 训练步需要 `&mut`, 验证步只需要 `&`, 因此验证期间状态不可能被修改.

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use ndarray::{s, Array4, ArrayView4};

use crate::consts::{DEFAULT_THRESHOLD, LOG_EVERY_N_STEPS};
use crate::error::{ShapeMismatchError, StepError};
use crate::figure;
use crate::loader::Batch;
use crate::loss::Criterion;
use crate::model::{predict, to_array, to_tensor, SegModel};
use crate::optim::AdamOptimizer;
use crate::score::{binarize_logit, dice_score};
use crate::sink::MetricSink;
use crate::{CtWindow, Split};

/// 模型参数 + 优化器状态 + 所在设备.
#[derive(Debug)]
pub struct ModelState<B: AutodiffBackend, M: AutodiffModule<B>> {
    /// 模型.
    pub model: M,

    /// 优化器.
    pub optimizer: AdamOptimizer<B, M>,

    /// 模型所在的设备.
    pub device: B::Device,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> ModelState<B, M> {
    /// 组合模型与优化器.
    #[inline]
    pub fn new(model: M, optimizer: AdamOptimizer<B, M>, device: B::Device) -> Self {
        Self {
            model,
            optimizer,
            device,
        }
    }
}

/// 单步的结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StepOutput {
    /// batch 平均损失.
    pub loss: f32,

    /// 阈值化预测与掩膜的 Dice, 仅作诊断.
    pub dice: f64,
}

/// 肺肿瘤二值分割任务.
#[derive(Copy, Clone, Debug)]
pub struct TumorSegmentation {
    criterion: Criterion,
    learning_rate: f64,
    threshold: f32,
    log_every: u64,
    window: CtWindow,
}

impl TumorSegmentation {
    /// 创建任务. 可视化阈值为 0.5, 每 50 步输出一次图像.
    pub fn new(criterion: Criterion, learning_rate: f64) -> Self {
        Self {
            criterion,
            learning_rate,
            threshold: DEFAULT_THRESHOLD,
            log_every: LOG_EVERY_N_STEPS,
            window: CtWindow::from_lung_normalized(),
        }
    }

    /// 设置可视化与诊断 Dice 的二值化阈值.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        assert!((0.0..1.0).contains(&threshold), "阈值必须位于 [0, 1)");
        self.threshold = threshold;
        self
    }

    /// 设置图像输出间隔. `0` 表示从不输出.
    pub fn with_log_every(mut self, n: u64) -> Self {
        self.log_every = n;
        self
    }

    /// 损失函数.
    #[inline]
    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// 二值化阈值.
    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 不追踪梯度的前向传播, 返回 logits.
    pub fn forward<B, M>(&self, state: &ModelState<B, M>, images: ArrayView4<f32>) -> Array4<f32>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: SegModel<B::InnerBackend>,
    {
        predict::<B::InnerBackend, _>(&state.model.valid(), images, &state.device)
    }

    /// 创建拥有全部模型参数的唯一优化器 (固定学习率的 Adam).
    #[inline]
    pub fn configure_optimizer<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> AdamOptimizer<B, M> {
        AdamOptimizer::new(self.learning_rate)
    }

    /// 以 [`TumorSegmentation::configure_optimizer`] 的优化器包装 `device` 上的模型.
    #[inline]
    pub fn init_state<B: AutodiffBackend, M: AutodiffModule<B>>(
        &self,
        model: M,
        device: B::Device,
    ) -> ModelState<B, M> {
        ModelState::new(model, self.configure_optimizer(), device)
    }

    /// 训练一步. 出错时 (形状不一致, 损失非有限) 不会更新任何参数.
    ///
    /// `batch_idx` 是本轮内的 batch 序号, 决定是否输出可视化;
    /// `step` 是全局 step, 所有记录都以它为横坐标.
    pub fn training_step<B, M, S>(
        &self,
        state: &mut ModelState<B, M>,
        batch: &Batch,
        batch_idx: u64,
        step: u64,
        sink: &mut S,
    ) -> Result<StepOutput, StepError>
    where
        B: AutodiffBackend,
        M: SegModel<B> + AutodiffModule<B>,
        S: MetricSink + ?Sized,
    {
        let phase = Split::Train;
        let (logits, loss) = self.checked_forward(&state.model, batch, &state.device)?;
        let value = loss.clone().into_scalar().elem::<f32>();
        check_finite(phase, step, value)?;

        let grads = GradientsParams::from_grads(loss.backward(), &state.model);
        state.model = state.optimizer.step(state.model.clone(), grads);

        Ok(self.report(phase, batch, &to_array(logits), value, batch_idx, step, sink))
    }

    /// 验证一步. 在不追踪梯度的后端上执行, 不修改模型状态.
    pub fn validation_step<B, M, S>(
        &self,
        state: &ModelState<B, M>,
        batch: &Batch,
        batch_idx: u64,
        step: u64,
        sink: &mut S,
    ) -> Result<StepOutput, StepError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: SegModel<B::InnerBackend>,
        S: MetricSink + ?Sized,
    {
        let phase = Split::Val;
        let model = state.model.valid();
        let (logits, loss) = self.checked_forward(&model, batch, &state.device)?;
        let value = loss.into_scalar().elem::<f32>();
        check_finite(phase, step, value)?;
        Ok(self.report(phase, batch, &to_array(logits), value, batch_idx, step, sink))
    }

    /// 前向传播并计算损失, 在边界处检查 batch 与输出的形状.
    fn checked_forward<B: Backend, M: SegModel<B>>(
        &self,
        model: &M,
        batch: &Batch,
        device: &B::Device,
    ) -> Result<(Tensor<B, 4>, Tensor<B, 1>), StepError> {
        check_shape(batch.images.shape(), batch.masks.shape())?;
        let logits = model.forward(to_tensor(batch.images(), device));
        check_shape(&logits.dims(), batch.masks.shape())?;
        let loss = self
            .criterion
            .loss(logits.clone(), to_tensor(batch.masks(), device));
        Ok((logits, loss))
    }

    /// 记录损失, 诊断 Dice 以及 (按间隔) 可视化.
    #[allow(clippy::too_many_arguments)]
    fn report<S: MetricSink + ?Sized>(
        &self,
        phase: Split,
        batch: &Batch,
        logits: &Array4<f32>,
        loss: f32,
        batch_idx: u64,
        step: u64,
        sink: &mut S,
    ) -> StepOutput {
        let hard = logits.mapv(|x| binarize_logit(x, self.threshold));
        // 形状已检查过
        let dice = dice_score(&hard, &batch.masks).unwrap_or(f64::NAN);

        sink.log_scalar(&format!("{phase} Loss"), loss as f64, step);
        sink.log_scalar(&format!("{phase} Dice"), dice, step);

        if self.log_every > 0 && batch_idx % self.log_every == 0 && !batch.is_empty() {
            let fig = figure::comparison(
                batch.images.slice(s![0, 0, .., ..]),
                batch.masks.slice(s![0, 0, .., ..]),
                hard.slice(s![0, 0, .., ..]),
                self.window,
            );
            sink.log_figure(&phase.to_string(), &fig, step);
        }
        StepOutput { loss, dice }
    }
}

#[inline]
fn check_shape(expected: &[usize], found: &[usize]) -> Result<(), ShapeMismatchError> {
    if expected == found {
        Ok(())
    } else {
        Err(ShapeMismatchError::new(expected, found))
    }
}

#[inline]
fn check_finite(phase: Split, step: u64, loss: f32) -> Result<(), StepError> {
    if loss.is_finite() {
        Ok(())
    } else {
        log::error!("{phase} 第 {step} 步损失为 {loss}");
        Err(StepError::NonFiniteLoss { phase, step, loss })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ShallowConvNet, TrainBackend};
    use crate::sink::MemorySink;
    use burn::module::Module;

    type Net = ShallowConvNet<TrainBackend>;

    fn batch(b: usize, h: usize, w: usize) -> Batch {
        let images = Array4::from_shape_fn((b, 1, h, w), |(n, _, i, j)| {
            ((n + i * w + j) % 7) as f32 / 7.0 - 0.5
        });
        let masks = Array4::from_shape_fn((b, 1, h, w), |(_, _, i, j)| {
            if i == j {
                1.0
            } else {
                0.0
            }
        });
        Batch::new(images, masks)
    }

    fn task() -> TumorSegmentation {
        TumorSegmentation::new(Criterion::BceWithLogits, 1e-2)
    }

    fn state(channels: usize, seed: u64) -> ModelState<TrainBackend, Net> {
        let device = Default::default();
        task().init_state(Net::new(channels, seed, &device), device)
    }

    #[test]
    fn test_training_step_updates_and_logs() {
        let task = task();
        let mut state = state(2, 0);
        let before = state.model.flat_params();
        let mut sink = MemorySink::default();

        let out = task
            .training_step(&mut state, &batch(2, 4, 4), 0, 0, &mut sink)
            .unwrap();
        assert!(out.loss.is_finite());
        assert!((0.0..=1.0).contains(&out.dice));
        assert_ne!(state.model.flat_params(), before);
        assert_eq!(state.optimizer.steps(), 1);
        assert_eq!(sink.values("Train Loss"), vec![out.loss as f64]);
        assert_eq!(sink.values("Train Dice").len(), 1);
        // 第 0 个 batch 输出可视化
        assert_eq!(sink.figures.len(), 1);
        assert_eq!(sink.figures[0].0, "Train");
        assert_eq!(sink.figures[0].2.dimensions(), (12, 4));
    }

    #[test]
    fn test_figure_interval() {
        let task = task().with_log_every(50);
        let mut state = state(2, 0);
        let mut sink = MemorySink::default();
        let b = batch(1, 3, 3);
        for batch_idx in 0..101 {
            task.training_step(&mut state, &b, batch_idx, 1000 + batch_idx, &mut sink)
                .unwrap();
        }
        // 间隔按 batch 序号计算, 记录使用全局 step
        let steps: Vec<u64> = sink.figures.iter().map(|f| f.1).collect();
        assert_eq!(steps, vec![1000, 1050, 1100]);
        assert_eq!(sink.values("Train Loss").len(), 101);
        assert!(sink.scalars.iter().all(|r| r.step >= 1000));
    }

    #[test]
    fn test_validation_step_is_read_only() {
        let task = task();
        let state = state(2, 0);
        let snapshot = state.model.flat_params();
        let mut sink = MemorySink::default();
        let out = task
            .validation_step(&state, &batch(3, 4, 5), 1, 7, &mut sink)
            .unwrap();
        assert_eq!(state.model.flat_params(), snapshot);
        assert_eq!(state.optimizer.steps(), 0);
        assert_eq!(sink.values("Val Loss"), vec![out.loss as f64]);
        assert!(sink.scalars.iter().all(|r| r.step == 7));
        assert!(sink.figures.is_empty());
    }

    #[test]
    fn test_validation_matches_training_forward() {
        let task = task();
        let state = state(3, 4);
        let b = batch(2, 5, 5);
        let mut sink = MemorySink::default();
        let val = task.validation_step(&state, &b, 0, 0, &mut sink).unwrap();

        let device = Default::default();
        let logits = state.model.forward(to_tensor(b.images(), &device));
        let loss = task.criterion().loss(logits, to_tensor(b.masks(), &device));
        let train = loss.into_scalar().elem::<f32>();
        assert!((val.loss - train).abs() < 1e-6);
    }

    #[test]
    fn test_shape_mismatch_before_update() {
        let task = task();
        let mut state = state(2, 0);
        let before = state.model.flat_params();
        let bad = Batch::new(Array4::zeros((1, 1, 4, 4)), Array4::zeros((1, 1, 4, 5)));
        let mut sink = MemorySink::default();

        let e = task
            .training_step(&mut state, &bad, 0, 0, &mut sink)
            .unwrap_err();
        assert!(matches!(e, StepError::ShapeMismatch(_)));
        assert_eq!(state.model.flat_params(), before);
        assert_eq!(state.optimizer.steps(), 0);
        assert!(sink.scalars.is_empty());
    }

    #[test]
    fn test_validation_shape_mismatch() {
        let task = task();
        let state = state(2, 0);
        let bad = Batch::new(Array4::zeros((2, 1, 6, 6)), Array4::zeros((2, 1, 6, 3)));
        let mut sink = MemorySink::default();

        let e = task
            .validation_step(&state, &bad, 0, 3, &mut sink)
            .unwrap_err();
        match e {
            StepError::ShapeMismatch(e) => {
                assert_eq!(e.expected, vec![2, 1, 6, 6]);
                assert_eq!(e.found, vec![2, 1, 6, 3]);
            }
            e => panic!("{e}"),
        }
        assert!(sink.scalars.is_empty());
        assert!(sink.figures.is_empty());
    }

    /// 输出全为 NaN 的模型.
    #[derive(Module, Debug)]
    struct NanModel<B: Backend> {
        inner: ShallowConvNet<B>,
    }

    impl<B: Backend> SegModel<B> for NanModel<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
            self.inner.forward(images) * f32::NAN
        }
    }

    fn nan_state() -> ModelState<TrainBackend, NanModel<TrainBackend>> {
        let device = Default::default();
        let model = NanModel {
            inner: Net::new(1, 0, &device),
        };
        task().init_state(model, device)
    }

    #[test]
    fn test_non_finite_loss_is_surfaced() {
        let task = task();
        let mut state = nan_state();
        let b = batch(1, 3, 3);
        let before = state.model.inner.flat_params();
        let mut sink = MemorySink::default();

        let e = task
            .training_step(&mut state, &b, 0, 4, &mut sink)
            .unwrap_err();
        assert!(matches!(
            e,
            StepError::NonFiniteLoss {
                phase: Split::Train,
                step: 4,
                ..
            }
        ));
        assert_eq!(state.model.inner.flat_params(), before);
        assert_eq!(state.optimizer.steps(), 0);
        assert!(sink.scalars.is_empty());
    }

    #[test]
    fn test_validation_non_finite_loss_is_surfaced() {
        let task = task();
        let state = nan_state();
        let mut sink = MemorySink::default();

        let e = task
            .validation_step(&state, &batch(2, 4, 4), 0, 9, &mut sink)
            .unwrap_err();
        match e {
            StepError::NonFiniteLoss { phase, step, loss } => {
                assert_eq!(phase, Split::Val);
                assert_eq!(step, 9);
                assert!(loss.is_nan());
            }
            e => panic!("{e}"),
        }
        assert!(sink.scalars.is_empty());
    }

    #[test]
    fn test_training_reduces_loss() {
        let task = TumorSegmentation::new(Criterion::BceWithLogits, 5e-2);
        let device = Default::default();
        let mut state = task.init_state(Net::new(4, 3, &device), device);
        let b = batch(2, 6, 6);
        let mut sink = MemorySink::default();
        let first = task.validation_step(&state, &b, 0, 0, &mut sink).unwrap().loss;
        for step in 0..200 {
            task.training_step(&mut state, &b, step, step, &mut sink).unwrap();
        }
        let last = task.validation_step(&state, &b, 0, 0, &mut sink).unwrap().loss;
        assert!(last < first, "{first} -> {last}");
    }

    #[test]
    fn test_forward_uses_inference_backend() {
        let task = task();
        let state = state(2, 1);
        let b = batch(1, 4, 4);
        let y = task.forward(&state, b.images());
        assert_eq!(y.dim(), (1, 1, 4, 4));
    }
}
