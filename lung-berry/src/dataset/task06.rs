//! Task06 Lung CT scan/label 数据加载器.
//!
//! 提供迭代器风格的数据集获取模式. 数据集目录结构为:
//!
//! ```text
//! {root}/imagesTr/lung_001.nii.gz
//! {root}/labelsTr/lung_001.nii.gz
//! ...
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::error::DatasetError;
use crate::CtData3d;

/// 病例文件名后缀.
const CASE_SUFFIX: &str = ".nii.gz";

/// 病例文件名前缀. 以 `.` 或 `_` 开头的文件是 macOS 生成的元数据, 会被忽略.
const CASE_PREFIX: &str = "lung_";

/// 假设 `path` 是数据集目录.
/// 返回值: (scan path, label path)
#[inline]
fn make_loader_path<P: AsRef<Path>>(path: P) -> (PathBuf, PathBuf) {
    let root = path.as_ref();
    (root.join("imagesTr"), root.join("labelsTr"))
}

/// 列出数据集目录 `root` 下所有病例名 (如 `lung_001`), 按名称升序排列.
///
/// 仅列出扫描和标注文件都存在的病例.
pub fn case_names<P: AsRef<Path>>(root: P) -> io::Result<Vec<String>> {
    let (scan_dir, label_dir) = make_loader_path(root);
    let names = fs::read_dir(&scan_dir)?
        .map_ok(|e| e.file_name().to_string_lossy().into_owned())
        .collect::<io::Result<Vec<String>>>()?
        .into_iter()
        .filter(|name| name.starts_with(CASE_PREFIX))
        .filter_map(|name| name.strip_suffix(CASE_SUFFIX).map(str::to_owned))
        .filter(|case| label_dir.join(format!("{case}{CASE_SUFFIX}")).is_file())
        .sorted()
        .collect();
    Ok(names)
}

/// 将有序病例名划分为 (训练集, 验证集). 最后 `val_count` 个病例划入验证集.
///
/// 若 `val_count` 不小于病例总数 (训练集会为空), 返回 [`DatasetError::TooFewCases`].
pub fn split_cases(
    mut names: Vec<String>,
    val_count: usize,
) -> Result<(Vec<String>, Vec<String>), DatasetError> {
    if val_count >= names.len() {
        return Err(DatasetError::TooFewCases {
            found: names.len(),
            val: val_count,
        });
    }
    let val = names.split_off(names.len() - val_count);
    Ok((names, val))
}

/// 从数据集目录和病例名列表创建 Task06 Lung CT 数据 ([`CtData3d`]) 加载器.
///
/// # 注意
///
/// 1. `dataset_path` 下必须存在 "imagesTr" 和 "labelsTr" 目录, 否则加载器在迭代时会返回 `Err`.
/// 2. 相同病例名对应的扫描和标注必须一一对应, 否则程序 panic.
pub fn ct_loader<I, S, P>(cases: I, dataset_path: P) -> CtDataLoader
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    P: AsRef<Path>,
{
    let (scan_path, label_path) = make_loader_path(dataset_path);
    let mut data: Vec<String> = cases.into_iter().map(Into::into).collect();
    data.reverse();

    CtDataLoader {
        scan_path,
        label_path,
        data_rev: data,
    }
}

/// 3D CT 数据集 (scan + label) 加载器. 每次迭代读取一个病例.
#[derive(Debug)]
pub struct CtDataLoader {
    scan_path: PathBuf,
    label_path: PathBuf,
    data_rev: Vec<String>,
}

impl Iterator for CtDataLoader {
    type Item = (String, nifti::Result<CtData3d>);

    fn next(&mut self) -> Option<Self::Item> {
        let case = self.data_rev.pop()?;

        let filename = format!("{case}{CASE_SUFFIX}");
        self.scan_path.push(&filename);
        self.label_path.push(&filename);
        let data = CtData3d::open(&self.scan_path, &self.label_path);
        self.label_path.pop();
        self.scan_path.pop();

        Some((case, data))
    }
}

impl ExactSizeIterator for CtDataLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_names() {
        let mut root = std::env::temp_dir();
        root.push(format!("lung-berry-task06-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let (scan_dir, label_dir) = make_loader_path(&root);
        fs::create_dir_all(&scan_dir).unwrap();
        fs::create_dir_all(&label_dir).unwrap();
        for name in ["lung_010.nii.gz", "lung_003.nii.gz", "._lung_001.nii.gz", "lung_020.nii.gz"] {
            fs::write(scan_dir.join(name), b"").unwrap();
        }
        for name in ["lung_010.nii.gz", "lung_003.nii.gz"] {
            fs::write(label_dir.join(name), b"").unwrap();
        }

        let names = case_names(&root).unwrap();
        assert_eq!(names, vec!["lung_003".to_string(), "lung_010".to_string()]);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_split_cases() {
        let names: Vec<String> = (1..=10).map(|i| format!("lung_{i:03}")).collect();
        let (train, val) = split_cases(names.clone(), 6).unwrap();
        assert_eq!(train.len(), 4);
        assert_eq!(val.first().map(String::as_str), Some("lung_005"));
        assert_eq!(val.len(), 6);

        assert!(matches!(
            split_cases(names[..6].to_vec(), 6),
            Err(DatasetError::TooFewCases { found: 6, val: 6 })
        ));
        assert!(matches!(
            split_cases(Vec::new(), 6),
            Err(DatasetError::TooFewCases { found: 0, val: 6 })
        ));
    }

    #[test]
    fn test_loader_len() {
        let loader = ct_loader(["lung_001", "lung_002"], "/nonexistent");
        assert_eq!(loader.len(), 2);
        let (case, res) = loader.into_iter().next().unwrap();
        assert_eq!(case, "lung_001");
        assert!(res.is_err());
    }
}
