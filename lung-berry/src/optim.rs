//! Adam 优化器 (自适应矩估计), 固定学习率.
//!
//! 对 [`burn::optim::Adam`] 的薄封装: 固定学习率, 记录更新次数,
//! 并暴露矩估计状态以便写入 checkpoint.

use std::fmt;

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;

use crate::consts::DEFAULT_LEARNING_RATE;

/// Adam 的矩估计状态.
pub type AdamRecord<B, M> = <OptimizerAdaptor<Adam, M, B> as Optimizer<M, B>>::Record;

/// 拥有模型全部参数的 Adam 优化器.
pub struct AdamOptimizer<B: AutodiffBackend, M: AutodiffModule<B>> {
    optimizer: OptimizerAdaptor<Adam, M, B>,
    learning_rate: f64,
    steps: u64,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> Default for AdamOptimizer<B, M> {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE)
    }
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> fmt::Debug for AdamOptimizer<B, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdamOptimizer")
            .field("learning_rate", &self.learning_rate)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> AdamOptimizer<B, M> {
    /// 使用 `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    pub fn new(learning_rate: f64) -> Self {
        Self::with_config(learning_rate, 0.9, 0.999, 1e-8)
    }

    /// 自定义衰减率和数值稳定项.
    ///
    /// # 注意
    ///
    /// `learning_rate` 必须为正, `beta1`, `beta2` 必须位于 `[0, 1)`, 否则程序 panic.
    pub fn with_config(learning_rate: f64, beta1: f32, beta2: f32, eps: f32) -> Self {
        assert!(learning_rate > 0.0, "学习率必须为正");
        assert!((0.0..1.0).contains(&beta1) && (0.0..1.0).contains(&beta2));
        let config = AdamConfig::new()
            .with_beta_1(beta1)
            .with_beta_2(beta2)
            .with_epsilon(eps);
        Self {
            optimizer: config.init(),
            learning_rate,
            steps: 0,
        }
    }

    /// 学习率.
    #[inline]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// 已执行的更新次数.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// 按梯度更新一次参数, 返回更新后的模型.
    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        self.steps += 1;
        self.optimizer.step(self.learning_rate, module, grads)
    }

    /// 当前的矩估计状态.
    #[inline]
    pub fn to_record(&self) -> AdamRecord<B, M> {
        self.optimizer.to_record()
    }

    /// 从保存的状态继续: 装入矩估计并恢复更新次数.
    pub fn resume(mut self, record: AdamRecord<B, M>, steps: u64) -> Self {
        self.optimizer = self.optimizer.load_record(record);
        self.steps = steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrainBackend;
    use burn::module::{Module, Param};
    use burn::tensor::backend::Backend;
    use burn::tensor::{ElementConversion, Tensor};

    #[derive(Module, Debug)]
    struct Scalar<B: Backend> {
        x: Param<Tensor<B, 1>>,
    }

    impl<B: Backend> Scalar<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                x: Param::from_tensor(Tensor::from_floats([0.0], device).require_grad()),
            }
        }

        fn value(&self) -> f32 {
            self.x.val().into_scalar().elem::<f32>()
        }
    }

    /// f(x) = (x - 3)^2 的一步.
    fn step(model: Scalar<TrainBackend>, adam: &mut AdamOptimizer<TrainBackend, Scalar<TrainBackend>>) -> Scalar<TrainBackend> {
        let loss = (model.x.val() - 3.0).powf_scalar(2.0).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        adam.step(model, grads)
    }

    #[test]
    fn test_first_step_magnitude() {
        // 第一步修正后 m_hat = g, v_hat = g^2, 更新量约为 lr * sign(g).
        let mut adam = AdamOptimizer::new(0.1);
        let model = step(Scalar::new(&Default::default()), &mut adam);
        assert!((model.value() - 0.1).abs() < 1e-4, "x = {}", model.value());
        assert_eq!(adam.steps(), 1);
        assert_eq!(adam.learning_rate(), 0.1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = AdamOptimizer::new(0.05);
        let mut model = Scalar::new(&Default::default());
        for _ in 0..2000 {
            model = step(model, &mut adam);
        }
        assert!((model.value() - 3.0).abs() < 5e-2, "x = {}", model.value());
        assert_eq!(adam.steps(), 2000);
    }

    #[test]
    fn test_resume_continues_from_moments() {
        let device = Default::default();
        let mut adam = AdamOptimizer::new(0.1);
        let mut model = Scalar::new(&device);
        for _ in 0..5 {
            model = step(model, &mut adam);
        }

        let mut resumed = AdamOptimizer::new(0.1).resume(adam.to_record(), adam.steps());
        assert_eq!(resumed.steps(), 5);
        let a = step(model.clone(), &mut adam);
        let b = step(model, &mut resumed);
        assert!((a.value() - b.value()).abs() < 1e-6);
    }

    #[test]
    #[should_panic]
    fn test_non_positive_learning_rate_panics() {
        let _ = AdamOptimizer::<TrainBackend, Scalar<TrainBackend>>::new(0.0);
    }
}
