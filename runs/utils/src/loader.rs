//! 对 `lung-berry::dataset` 的更一层封装. 提供更直接的数据集路径与加载器.

use lung_berry::dataset::{NpySliceDataset, RandomAffine};
use lung_berry::error::DatasetError;
use lung_berry::Split;
use std::env;
use std::path::{Path, PathBuf};

/// 若环境变量 `key` 非空, 则返回其值; 否则返回 `$HOME/dataset/{rest...}`.
fn dir_from_env_or_home(key: &str, rest: &[&str]) -> PathBuf {
    match env::var(key) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => lung_berry::dataset::home_dataset_dir_with(rest).unwrap(),
    }
}

/// 获取 Task06 Lung 原始数据集路径.
///
/// 1. 若环境变量 `$LUNG_RAW_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/Task06_Lung`.
pub fn raw_dir_from_env_or_home() -> PathBuf {
    dir_from_env_or_home("LUNG_RAW_DIR", &["Task06_Lung"])
}

/// 获取预处理后的切片数据集路径.
///
/// 1. 若环境变量 `$LUNG_SLICE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/Task06_Lung/Preprocessed`.
pub fn slice_dir_from_env_or_home() -> PathBuf {
    dir_from_env_or_home("LUNG_SLICE_DIR", &["Task06_Lung", "Preprocessed"])
}

/// 获取训练输出 (指标, 图像, checkpoint) 路径.
///
/// 1. 若环境变量 `$LUNG_RUN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/Task06_Lung/runs`.
pub fn run_dir_from_env_or_home() -> PathBuf {
    dir_from_env_or_home("LUNG_RUN_DIR", &["Task06_Lung", "runs"])
}

/// 打开切片数据集的某个划分. 训练集附带随机仿射增强, 验证集不做增强.
pub fn split_dataset<P: AsRef<Path>>(slice_dir: P, split: Split) -> Result<NpySliceDataset, DatasetError> {
    let ds = NpySliceDataset::open(slice_dir.as_ref().join(split.dir_name()))?;
    Ok(match split {
        Split::Train => ds.with_augment(RandomAffine::default()),
        Split::Val => ds,
    })
}
