//! 训练/验证的样本抽取顺序.
//!
//! 含肿瘤的切片在数据集中非常稀少. 如果按自然频率训练, 基于梯度的优化器很容易
//! 收敛到 "全背景" 的平凡解. [`WeightedSampler`] 按类别频率的倒数为每个样本加权,
//! 有放回地抽取与数据集等长的索引序列, 使正负切片的期望出现次数约为 1:1.
//!
//! 验证集 **不** 使用加权采样: [`SequentialSampler`] 按固定顺序恰好遍历一次.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::SliceDataset;
use crate::error::{DatasetError, DegenerateDatasetError};

/// 逐个读取数据集样本, 得到有序的类别标签序列 (是否含肿瘤).
pub fn class_labels<D: SliceDataset + ?Sized>(dataset: &D) -> Result<Vec<bool>, DatasetError> {
    (0..dataset.len()).map(|i| dataset.class_label(i)).collect()
}

/// 统计 (负样本数, 正样本数).
#[inline]
fn count_classes(labels: &[bool]) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l).count();
    (labels.len() - positives, positives)
}

/// 类别不平衡比例 `r = n0 / n1`.
///
/// 没有正样本时比例无定义, 返回 `Err` 而不是 inf/NaN.
pub fn imbalance_ratio(labels: &[bool]) -> Result<f64, DegenerateDatasetError> {
    let (n0, n1) = count_classes(labels);
    if n1 == 0 {
        return Err(DegenerateDatasetError { negatives: n0 });
    }
    Ok(n0 as f64 / n1 as f64)
}

/// 按类别频率的倒数计算每个样本的权重, 保持样本顺序.
///
/// 负样本权重为 `1`, 正样本权重为 `n0 / n1`.
pub fn inverse_frequency_weights(labels: &[bool]) -> Result<Vec<f64>, DegenerateDatasetError> {
    let ratio = imbalance_ratio(labels)?;
    Ok(labels
        .iter()
        .map(|&l| if l { ratio } else { 1.0 })
        .collect())
}

/// 每个 epoch 的样本抽取顺序.
pub trait Sampler {
    /// 每个 epoch 抽取的索引个数.
    fn len(&self) -> usize;

    /// 是否不抽取任何样本.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 第 `epoch` 个 epoch 的索引序列.
    fn epoch_indices(&self, epoch: u64) -> Vec<usize>;
}

/// 按类别频率倒数加权的有放回采样器.
///
/// 权重在构建时计算一次, 之后不可变; 数据集变化时应当重新构建.
/// 每个 epoch 都以 `seed + epoch` 重新播种, 不会复用固定的索引序列.
#[derive(Clone, Debug)]
pub struct WeightedSampler {
    weights: Vec<f64>,
    ratio: f64,
    positives: usize,

    /// 全部权重为 0 (数据集全为正样本) 时为 `None`, 此时退化为均匀采样.
    dist: Option<WeightedIndex<f64>>,
    seed: u64,
}

impl WeightedSampler {
    /// 由有序类别标签构建. 没有正样本时返回 `Err`.
    pub fn from_labels(labels: &[bool], seed: u64) -> Result<Self, DegenerateDatasetError> {
        let weights = inverse_frequency_weights(labels)?;
        let ratio = imbalance_ratio(labels)?;
        let positives = count_classes(labels).1;
        // 仅当不存在负样本时 ratio == 0 且所有权重为 0.
        let dist = WeightedIndex::new(&weights).ok();
        debug_assert_eq!(dist.is_none(), ratio == 0.0);

        log::info!(
            "加权采样器: {} 个样本, {} 个正样本, 正样本权重 {:.4}",
            labels.len(),
            positives,
            ratio
        );
        Ok(Self {
            weights,
            ratio,
            positives,
            dist,
            seed,
        })
    }

    /// 读取整个数据集的类别标签后构建.
    ///
    /// 读取失败和没有正样本是两类不同的错误, 分别以外层/内层 `Result` 返回.
    pub fn from_dataset<D: SliceDataset + ?Sized>(
        dataset: &D,
        seed: u64,
    ) -> Result<Result<Self, DegenerateDatasetError>, DatasetError> {
        let labels = class_labels(dataset)?;
        Ok(Self::from_labels(&labels, seed))
    }

    /// 每个样本的权重, 与数据集顺序一致.
    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// 正样本权重 `n0 / n1`.
    #[inline]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// 正样本个数.
    #[inline]
    pub fn positives(&self) -> usize {
        self.positives
    }

    /// 用给定随机源有放回地抽取与数据集等长的索引序列.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let n = self.weights.len();
        match &self.dist {
            Some(dist) => (0..n).map(|_| dist.sample(rng)).collect(),
            None => (0..n).map(|_| rng.gen_range(0..n)).collect(),
        }
    }
}

impl Sampler for WeightedSampler {
    #[inline]
    fn len(&self) -> usize {
        self.weights.len()
    }

    fn epoch_indices(&self, epoch: u64) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch));
        self.draw(&mut rng)
    }
}

/// 按 `0..len` 固定顺序遍历, 每个样本恰好一次. 用于验证集.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequentialSampler {
    len: usize,
}

impl SequentialSampler {
    /// 构建长度为 `len` 的顺序采样器.
    #[inline]
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Sampler for SequentialSampler {
    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn epoch_indices(&self, _epoch: u64) -> Vec<usize> {
        (0..self.len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_8_2() -> Vec<bool> {
        // 正样本位于索引 3 和 7.
        (0..10).map(|i| i == 3 || i == 7).collect()
    }

    #[test]
    fn test_ratio_and_weights() {
        let labels = labels_8_2();
        assert_eq!(imbalance_ratio(&labels).unwrap(), 4.0);

        let w = inverse_frequency_weights(&labels).unwrap();
        assert_eq!(w.len(), 10);
        for (i, &wi) in w.iter().enumerate() {
            if i == 3 || i == 7 {
                assert_eq!(wi, 4.0);
            } else {
                assert_eq!(wi, 1.0);
            }
        }
        assert_eq!(w.iter().filter(|&&x| x == 1.0).count(), 8);
    }

    #[test]
    fn test_weights_general() {
        for n0 in 0..6usize {
            for n1 in 1..5usize {
                // 正样本交错放在负样本之间.
                let mut labels = vec![false; n0];
                for k in 0..n1 {
                    labels.insert((k * 2).min(labels.len()), true);
                }
                assert_eq!(labels.iter().filter(|&&l| l).count(), n1);
                let w = inverse_frequency_weights(&labels).unwrap();
                assert_eq!(w.len(), labels.len());
                for (&l, &wi) in labels.iter().zip(&w) {
                    if l {
                        assert_eq!(wi, n0 as f64 / n1 as f64);
                    } else {
                        assert_eq!(wi, 1.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_degenerate() {
        for n0 in [0usize, 1, 17] {
            let labels = vec![false; n0];
            assert_eq!(
                inverse_frequency_weights(&labels),
                Err(DegenerateDatasetError { negatives: n0 })
            );
            assert!(WeightedSampler::from_labels(&labels, 0).is_err());
        }
    }

    #[test]
    fn test_balanced_presentation() {
        // 1 个正样本, 99 个负样本.
        let labels: Vec<bool> = (0..100).map(|i| i == 42).collect();
        let sampler = WeightedSampler::from_labels(&labels, 1234).unwrap();
        assert_eq!(sampler.ratio(), 99.0);

        let mut pos = 0usize;
        let mut total = 0usize;
        for epoch in 0..50 {
            let idx = sampler.epoch_indices(epoch);
            assert_eq!(idx.len(), 100);
            assert!(idx.iter().all(|&i| i < 100));
            pos += idx.iter().filter(|&&i| i == 42).count();
            total += idx.len();
        }
        let frac = pos as f64 / total as f64;
        assert!((0.4..0.6).contains(&frac), "正样本占比 {frac}");
    }

    #[test]
    fn test_epochs_differ_but_reproducible() {
        let labels = labels_8_2();
        let sampler = WeightedSampler::from_labels(&labels, 7).unwrap();
        assert_eq!(sampler.epoch_indices(3), sampler.epoch_indices(3));
        let distinct = (0..8)
            .map(|e| sampler.epoch_indices(e))
            .collect::<std::collections::HashSet<_>>();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_all_positive_is_uniform() {
        let labels = vec![true; 5];
        let sampler = WeightedSampler::from_labels(&labels, 0).unwrap();
        assert_eq!(sampler.ratio(), 0.0);
        assert!(sampler.weights().iter().all(|&w| w == 0.0));
        let idx = sampler.epoch_indices(0);
        assert_eq!(idx.len(), 5);
        assert!(idx.iter().all(|&i| i < 5));
    }

    #[test]
    fn test_sequential() {
        let s = SequentialSampler::new(4);
        assert_eq!(s.epoch_indices(0), vec![0, 1, 2, 3]);
        assert_eq!(s.epoch_indices(9), vec![0, 1, 2, 3]);
        assert!(SequentialSampler::new(0).is_empty());
    }
}
