use super::{Sample, SliceDataset};
use crate::error::DatasetError;

/// 完全驻留内存的切片数据集. 主要用于小规模实验和测试.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    /// 由样本序列直接创建.
    ///
    /// 所有样本的分辨率必须一致, 否则程序 panic.
    pub fn new(samples: Vec<Sample>) -> Self {
        if let Some(first) = samples.first() {
            let sh = first.shape();
            assert!(
                samples.iter().all(|s| s.shape() == sh),
                "同一数据集中的样本分辨率必须一致"
            );
        }
        Self { samples }
    }

    /// 获取所有样本的不可变引用.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl FromIterator<Sample> for InMemoryDataset {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl SliceDataset for InMemoryDataset {
    #[inline]
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(DatasetError::IndexOutOfRange(index, self.samples.len()))
    }
}
