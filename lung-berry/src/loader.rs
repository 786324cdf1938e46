//! batch 组装.
//!
//! [`DataLoader`] 按给定的索引顺序 (来自 [`crate::sampler::Sampler`]) 从数据集中拉取样本,
//! 每 `batch_size` 个拼成一个 `(b, 1, H, W)` 的 [`Batch`]. 调用方对下一个 batch 的请求是阻塞的;
//! 启用 `rayon` 特性时同一 batch 内的样本并行读取 (含数据增强).

use ndarray::{s, Array4, ArrayView4};

use crate::dataset::{Sample, SliceDataset};
use crate::error::{LoadError, ShapeMismatchError};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一个 batch: 扫描与掩膜, 形状均为 `(b, 1, H, W)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// 扫描.
    pub images: Array4<f32>,

    /// 掩膜.
    pub masks: Array4<f32>,
}

impl Batch {
    /// 直接由两个张量构建, 不做形状检查. 形状在 step 边界统一检查.
    #[inline]
    pub fn new(images: Array4<f32>, masks: Array4<f32>) -> Self {
        Self { images, masks }
    }

    /// 由若干分辨率相同的样本拼接 batch.
    ///
    /// 以第一个样本的分辨率为准, 其余样本不一致时返回 `Err`.
    ///
    /// # 注意
    ///
    /// `samples` 不能为空, 否则程序 panic.
    pub fn collate(samples: &[Sample]) -> Result<Self, ShapeMismatchError> {
        assert!(!samples.is_empty(), "不能拼接空 batch");
        let (h, w) = samples[0].shape();
        if let Some(bad) = samples.iter().find(|s| s.shape() != (h, w)) {
            return Err(ShapeMismatchError::new(&[h, w], bad.image.shape()));
        }

        let b = samples.len();
        let mut images = Array4::zeros((b, 1, h, w));
        let mut masks = Array4::zeros((b, 1, h, w));
        for (i, sample) in samples.iter().enumerate() {
            images.slice_mut(s![i, 0, .., ..]).assign(&sample.image);
            masks.slice_mut(s![i, 0, .., ..]).assign(&sample.mask);
        }
        Ok(Self { images, masks })
    }

    /// batch 大小.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.dim().0
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 扫描视图.
    #[inline]
    pub fn images(&self) -> ArrayView4<f32> {
        self.images.view()
    }

    /// 掩膜视图.
    #[inline]
    pub fn masks(&self) -> ArrayView4<f32> {
        self.masks.view()
    }
}

/// 按索引顺序分 batch 读取数据集. 最后一个 batch 可能不满.
pub struct DataLoader<'a, D: ?Sized> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a, D: SliceDataset + ?Sized> DataLoader<'a, D> {
    /// 创建加载器.
    ///
    /// # 注意
    ///
    /// `batch_size` 必须为正, 否则程序 panic.
    pub fn new(dataset: &'a D, order: Vec<usize>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size 必须为正");
        Self {
            dataset,
            order,
            batch_size,
            cursor: 0,
        }
    }

    /// 总 batch 数.
    #[inline]
    pub fn num_batches(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }

    fn fetch(&self, indices: &[usize]) -> Result<Vec<Sample>, LoadError> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let samples = indices
                    .par_iter()
                    .map(|&i| self.dataset.get(i))
                    .collect::<Result<Vec<_>, _>>()?;
            } else {
                let samples = indices
                    .iter()
                    .map(|&i| self.dataset.get(i))
                    .collect::<Result<Vec<_>, _>>()?;
            }
        }
        Ok(samples)
    }
}

impl<'a, D: SliceDataset + ?Sized> Iterator for DataLoader<'a, D> {
    type Item = Result<Batch, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        let ans = self
            .fetch(indices)
            .and_then(|samples| Batch::collate(&samples).map_err(LoadError::from));
        self.cursor = end;
        Some(ans)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.order.len() - self.cursor + self.batch_size - 1) / self.batch_size;
        (left, Some(left))
    }
}

impl<'a, D: SliceDataset + ?Sized> ExactSizeIterator for DataLoader<'a, D> {}

/// 设置全局数据加载线程数. 只能在第一次使用 `rayon` 之前调用一次, 之后的调用无效.
#[cfg(feature = "rayon")]
pub fn init_workers(num_workers: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build_global()
    {
        log::warn!("无法设置数据加载线程数 {num_workers}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::error::DatasetError;
    use ndarray::Array2;

    fn dataset(n: usize) -> InMemoryDataset {
        (0..n)
            .map(|i| {
                let image = Array2::from_elem((3, 2), i as f32);
                let mask = Array2::from_elem((3, 2), (i % 2) as f32);
                Sample::new(image, mask).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_batches_follow_order() {
        let ds = dataset(5);
        let loader = DataLoader::new(&ds, vec![4, 0, 3, 3, 1], 2);
        assert_eq!(loader.len(), 3);
        let batches: Vec<Batch> = loader.map(Result::unwrap).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].images.dim(), (2, 1, 3, 2));
        assert_eq!(batches[2].images.dim(), (1, 1, 3, 2));

        let firsts: Vec<f32> = batches
            .iter()
            .flat_map(|b| (0..b.len()).map(move |i| b.images[(i, 0, 0, 0)]))
            .collect();
        assert_eq!(firsts, vec![4.0, 0.0, 3.0, 3.0, 1.0]);
        assert_eq!(batches[0].masks[(1, 0, 2, 1)], 0.0);
        assert_eq!(batches[2].masks[(0, 0, 2, 1)], 1.0);
    }

    #[test]
    fn test_collate_rejects_mixed_shapes() {
        let a = Sample::new(Array2::zeros((2, 2)), Array2::zeros((2, 2))).unwrap();
        let b = Sample::new(Array2::zeros((3, 2)), Array2::zeros((3, 2))).unwrap();
        let e = Batch::collate(&[a, b]).unwrap_err();
        assert_eq!(e.expected, vec![2, 2]);
        assert_eq!(e.found, vec![3, 2]);
    }

    #[test]
    fn test_out_of_range_index() {
        let ds = dataset(2);
        let mut loader = DataLoader::new(&ds, vec![0, 7], 4);
        assert!(matches!(
            loader.next(),
            Some(Err(LoadError::Dataset(DatasetError::IndexOutOfRange(7, 2))))
        ));
        assert!(loader.next().is_none());
    }
}
