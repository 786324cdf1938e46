//! 预处理后的 npy 切片数据集.
//!
//! 目录结构 (由 [`crate::preprocess`] 生成):
//!
//! ```text
//! {root}/{case}/data/{i}.npy    f32 归一化扫描切片
//! {root}/{case}/masks/{i}.npy   u8 标签切片
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use ndarray::Array2;
use ndarray_npy::read_npy;

use super::{Augment, Sample, SliceDataset};
use crate::error::DatasetError;

/// 收集 `dir` 下所有形如 `{i}.npy` 的文件, 按 `i` 的数值升序排列.
fn numbered_npy_files(dir: &Path) -> io::Result<Vec<(usize, PathBuf)>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(true, |e| e != "npy") {
            continue;
        }
        let Some(num) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<usize>().ok())
        else {
            continue;
        };
        ans.push((num, path));
    }
    ans.sort_unstable_by_key(|(num, _)| *num);
    Ok(ans)
}

/// 磁盘上的 npy 切片数据集.
///
/// 样本按 (病例名, 切片序号) 排序, 因此同一目录每次打开得到的顺序相同.
pub struct NpySliceDataset {
    entries: Vec<(PathBuf, PathBuf)>,
    augment: Option<Box<dyn Augment>>,
}

impl NpySliceDataset {
    /// 扫描 `root` 下所有病例目录, 建立样本索引. 该操作不读取切片内容.
    ///
    /// 如果某个扫描切片没有对应的掩膜文件, 则返回 `Err`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, DatasetError> {
        let cases: Vec<PathBuf> = fs::read_dir(root.as_ref())?
            .map_ok(|e| e.path())
            .filter_ok(|p| p.is_dir())
            .collect::<io::Result<Vec<_>>>()?
            .into_iter()
            .sorted()
            .collect();

        let mut entries = Vec::new();
        for case in cases {
            let data_dir = case.join("data");
            let mask_dir = case.join("masks");
            if !data_dir.is_dir() {
                log::debug!("跳过没有 data 目录的路径 {}", case.display());
                continue;
            }
            for (num, scan) in numbered_npy_files(&data_dir)? {
                let mask = mask_dir.join(format!("{num}.npy"));
                if !mask.is_file() {
                    return Err(DatasetError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("缺少掩膜文件 {}", mask.display()),
                    )));
                }
                entries.push((scan, mask));
            }
        }

        log::info!(
            "从 {} 加载了 {} 个切片",
            root.as_ref().display(),
            entries.len()
        );
        Ok(Self {
            entries,
            augment: None,
        })
    }

    /// 为每次访问附加数据增强算子. 通常仅用于训练集.
    pub fn with_augment<A: Augment + 'static>(mut self, augment: A) -> Self {
        self.augment = Some(Box::new(augment));
        self
    }

    /// 是否附带数据增强.
    #[inline]
    pub fn is_augmented(&self) -> bool {
        self.augment.is_some()
    }

    /// 所有样本的 (扫描文件, 掩膜文件) 路径.
    #[inline]
    pub fn entries(&self) -> &[(PathBuf, PathBuf)] {
        &self.entries
    }

    /// 从磁盘读取未增强的样本.
    fn read_raw(&self, index: usize) -> Result<Sample, DatasetError> {
        let (scan, mask) = self
            .entries
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange(index, self.entries.len()))?;
        let image: Array2<f32> = read_npy(scan)?;
        let label: Array2<u8> = read_npy(mask)?;
        Sample::from_label(image, &label).map_err(DatasetError::InconsistentShape)
    }
}

impl SliceDataset for NpySliceDataset {
    #[inline]
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        let sample = self.read_raw(index)?;
        Ok(match &self.augment {
            Some(aug) => aug.apply(sample, &mut rand::thread_rng()),
            None => sample,
        })
    }

    fn class_label(&self, index: usize) -> Result<bool, DatasetError> {
        let (_, mask) = self
            .entries
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange(index, self.entries.len()))?;
        let label: Array2<u8> = read_npy(mask)?;
        Ok(label.iter().any(|&p| crate::consts::gray::is_tumor(p)))
    }
}
