//! 训练配置与训练循环.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;

use crate::checkpoint::{Checkpoint, SavedCheckpoint, TopKCheckpoints};
use crate::consts::{DEFAULT_LEARNING_RATE, DEFAULT_THRESHOLD, DEFAULT_TOP_K, LOG_EVERY_N_STEPS};
use crate::dataset::SliceDataset;
use crate::error::RunError;
use crate::loader::DataLoader;
use crate::loss::Criterion;
use crate::model::SegModel;
use crate::sampler::{Sampler, SequentialSampler, WeightedSampler};
use crate::sink::MetricSink;
use crate::task::{ModelState, StepOutput, TumorSegmentation};
use crate::Split;

/// 训练配置.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// batch 大小.
    pub batch_size: usize,

    /// 数据加载线程数.
    pub num_workers: usize,

    /// epoch 数.
    pub max_epochs: u64,

    /// Adam 学习率.
    pub learning_rate: f64,

    /// 可视化输出间隔 (step).
    pub log_every_n_steps: u64,

    /// 可视化与诊断 Dice 的二值化阈值.
    pub threshold: f32,

    /// 按验证损失保留的 checkpoint 个数.
    pub top_k: usize,

    /// 加权采样的随机种子.
    pub seed: u64,

    /// 损失函数.
    pub criterion: Criterion,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 4,
            max_epochs: 30,
            learning_rate: DEFAULT_LEARNING_RATE,
            log_every_n_steps: LOG_EVERY_N_STEPS,
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            seed: 42,
            criterion: Criterion::BceWithLogits,
        }
    }
}

/// 配置项无法解析或取值非法.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// 环境变量名.
    pub key: &'static str,

    /// 原始取值.
    pub value: String,

    /// 原因.
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=`{}` 无效: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// 若 `lookup(key)` 有值, 则解析后写入 `slot`.
fn parse_into<T, F>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *slot = value.trim().parse().map_err(|e: T::Err| ConfigError {
            key,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

impl TrainConfig {
    /// 以默认值为基础, 读取 `LUNG_*` 环境变量覆盖对应字段.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// 以 `lookup` (变量名 -> 取值) 覆盖字段. 无法解析或取值非法的变量会被报告.
    pub fn with_overrides<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Result<Self, ConfigError> {
        parse_into(&lookup, "LUNG_BATCH_SIZE", &mut self.batch_size)?;
        parse_into(&lookup, "LUNG_WORKERS", &mut self.num_workers)?;
        parse_into(&lookup, "LUNG_EPOCHS", &mut self.max_epochs)?;
        parse_into(&lookup, "LUNG_LR", &mut self.learning_rate)?;
        parse_into(&lookup, "LUNG_LOG_EVERY", &mut self.log_every_n_steps)?;
        parse_into(&lookup, "LUNG_THRESHOLD", &mut self.threshold)?;
        parse_into(&lookup, "LUNG_TOP_K", &mut self.top_k)?;
        parse_into(&lookup, "LUNG_SEED", &mut self.seed)?;
        parse_into(&lookup, "LUNG_CRITERION", &mut self.criterion)?;
        self.validate()?;
        Ok(self)
    }

    /// 检查取值范围.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, value: String, reason: &str| ConfigError {
            key,
            value,
            reason: reason.to_owned(),
        };
        if self.batch_size == 0 {
            return Err(invalid("LUNG_BATCH_SIZE", "0".into(), "必须为正"));
        }
        if self.num_workers == 0 {
            return Err(invalid("LUNG_WORKERS", "0".into(), "必须为正"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(invalid("LUNG_LR", self.learning_rate.to_string(), "必须为正"));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(invalid("LUNG_THRESHOLD", self.threshold.to_string(), "必须位于 [0, 1)"));
        }
        Ok(())
    }

    /// 由配置构建单步任务.
    pub fn task(&self) -> TumorSegmentation {
        TumorSegmentation::new(self.criterion, self.learning_rate)
            .with_threshold(self.threshold)
            .with_log_every(self.log_every_n_steps)
    }
}

/// 一个 epoch 的汇总. 损失与 Dice 均为按样本数加权的 batch 平均.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochSummary {
    /// epoch 序号, 从 0 开始.
    pub epoch: u64,

    /// 训练损失.
    pub train_loss: f64,

    /// 训练诊断 Dice.
    pub train_dice: f64,

    /// 验证损失. checkpoint 以该值排序.
    pub val_loss: f64,

    /// 验证诊断 Dice.
    pub val_dice: f64,

    /// 本 epoch 写出的 checkpoint.
    pub checkpoint: Option<PathBuf>,
}

/// 整个训练过程的结果.
#[derive(Clone, Debug, Default)]
pub struct FitReport {
    /// 各 epoch 汇总.
    pub epochs: Vec<EpochSummary>,

    /// 训练 step 总数.
    pub global_step: u64,

    /// 验证损失最小的 checkpoint.
    pub best: Option<SavedCheckpoint>,
}

/// 按样本数加权的 (损失, Dice) 均值.
#[derive(Default)]
struct RunningMean {
    loss: f64,
    dice: f64,
    count: usize,
}

impl RunningMean {
    fn push(&mut self, out: StepOutput, n: usize) {
        self.loss += out.loss as f64 * n as f64;
        self.dice += out.dice * n as f64;
        self.count += n;
    }

    fn mean(&self) -> (f64, f64) {
        let n = self.count.max(1) as f64;
        (self.loss / n, self.dice / n)
    }
}

/// 训练循环: 每个 epoch 先以加权采样训练, 再按顺序完整验证一次, 最后提交 checkpoint.
#[derive(Clone, Debug)]
pub struct Trainer {
    config: TrainConfig,
    task: TumorSegmentation,
}

impl Trainer {
    /// 由配置创建.
    pub fn new(config: TrainConfig) -> Self {
        let task = config.task();
        Self { config, task }
    }

    /// 训练配置.
    #[inline]
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// 单步任务.
    #[inline]
    pub fn task(&self) -> &TumorSegmentation {
        &self.task
    }

    /// 训练 `state`.
    ///
    /// `ckpt_dir` 为 `None` 时不保存 checkpoint. 任何错误都会立即终止训练,
    /// 出错的 epoch 不会写出 checkpoint.
    ///
    /// 训练与验证的记录都以全局训练 step 为横坐标; 可视化间隔按每轮内的 batch 序号计算.
    pub fn fit<B, M, T, V, S>(
        &self,
        state: &mut ModelState<B, M>,
        train: &T,
        val: &V,
        ckpt_dir: Option<&Path>,
        sink: &mut S,
    ) -> Result<FitReport, RunError>
    where
        B: AutodiffBackend,
        M: SegModel<B> + AutodiffModule<B>,
        M::InnerModule: SegModel<B::InnerBackend>,
        T: SliceDataset + ?Sized,
        V: SliceDataset + ?Sized,
        S: MetricSink + ?Sized,
    {
        if train.is_empty() {
            return Err(RunError::EmptyDataset(Split::Train));
        }
        if val.is_empty() {
            return Err(RunError::EmptyDataset(Split::Val));
        }

        let sampler = WeightedSampler::from_dataset(train, self.config.seed)
            .map_err(|e| RunError::Dataset(Split::Train, e))?
            .map_err(|e| RunError::Degenerate(Split::Train, e))?;
        let val_order = SequentialSampler::new(val.len());
        let mut top_k = ckpt_dir
            .map(|dir| TopKCheckpoints::new(dir, self.config.top_k))
            .transpose()?;

        let mut report = FitReport::default();
        for epoch in 0..self.config.max_epochs {
            let mut train_mean = RunningMean::default();
            let loader = DataLoader::new(train, sampler.epoch_indices(epoch), self.config.batch_size);
            for (batch_idx, batch) in (0u64..).zip(loader) {
                let batch = batch.map_err(|e| RunError::load(Split::Train, e))?;
                let out = self
                    .task
                    .training_step(state, &batch, batch_idx, report.global_step, sink)?;
                train_mean.push(out, batch.len());
                report.global_step += 1;
            }

            let mut val_mean = RunningMean::default();
            let loader = DataLoader::new(val, val_order.epoch_indices(epoch), self.config.batch_size);
            for (batch_idx, batch) in (0u64..).zip(loader) {
                let batch = batch.map_err(|e| RunError::load(Split::Val, e))?;
                let out = self
                    .task
                    .validation_step(state, &batch, batch_idx, report.global_step, sink)?;
                val_mean.push(out, batch.len());
            }

            let (train_loss, train_dice) = train_mean.mean();
            let (val_loss, val_dice) = val_mean.mean();
            log::info!(
                "epoch {epoch}: train loss {train_loss:.5}, dice {train_dice:.4}; val loss {val_loss:.5}, dice {val_dice:.4}"
            );

            let checkpoint = match top_k.as_mut() {
                Some(top_k) => {
                    let ckpt = Checkpoint::capture(state, epoch, report.global_step, val_loss as f32)?;
                    top_k.offer(&ckpt)?
                }
                None => None,
            };
            if let Some(path) = &checkpoint {
                log::info!("保存 checkpoint {}", path.display());
            }

            report.epochs.push(EpochSummary {
                epoch,
                train_loss,
                train_dice,
                val_loss,
                val_dice,
                checkpoint,
            });
        }
        report.best = top_k.and_then(|t| t.best().cloned());
        Ok(report)
    }
}
