//! 3D CT 病例到 2D 训练切片的预处理.
//!
//! 对每个病例:
//!
//! 1. 丢弃前 [`SKIP_LEADING_SLICES`] 个水平切片 (通常不包含肺部);
//! 2. HU 值除以 [`HU_SCALE`] 归一化;
//! 3. 扫描切片双线性缩放、标签切片最近邻缩放到 [`SLICE_SHAPE`];
//! 4. 写入 `{out}/{split}/{case}/data/{i}.npy` 和 `{out}/{split}/{case}/masks/{i}.npy`.
//!
//! 开启 [`PreprocessConfig::preview`] 时, 含肿瘤的切片还会以原始分辨率另存为
//! `{out}/{split}/{case}/preview/{i}-scan.png` 和 `{i}-mask.png`, 便于人工检查.
//!
//! 按名称排序后的最后 [`VAL_CASES`] 个病例划入验证集.

use std::fs;
use std::path::Path;

use ndarray_npy::write_npy;

use crate::consts::{HU_SCALE, SKIP_LEADING_SLICES, SLICE_SHAPE, VAL_CASES};
use crate::data::resize::{resize_bilinear, resize_nearest};
use crate::dataset::task06;
use crate::error::DatasetError;
use crate::ImgWriteVis;
use crate::{CtData3d, Idx2d, NiftiHeaderAttr, Split};

/// 预处理参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    /// 丢弃的起始切片个数.
    pub skip_leading: usize,

    /// HU 归一化因子.
    pub hu_scale: f32,

    /// 输出切片分辨率 (高, 宽).
    pub target: Idx2d,

    /// 验证集病例个数.
    pub val_cases: usize,

    /// 是否为含肿瘤的切片写出 PNG 预览.
    pub preview: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            skip_leading: SKIP_LEADING_SLICES,
            hu_scale: HU_SCALE,
            target: SLICE_SHAPE,
            val_cases: VAL_CASES,
            preview: false,
        }
    }
}

/// 单个病例的预处理结果.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseSummary {
    /// 病例名.
    pub case: String,

    /// 所属划分.
    pub split: Split,

    /// 写出的切片个数.
    pub slices: usize,

    /// 其中含肿瘤的切片个数.
    pub positive: usize,
}

/// 整个数据集的预处理结果.
#[derive(Clone, Debug, Default)]
pub struct PreprocessReport {
    /// 各病例结果, 按处理顺序排列.
    pub cases: Vec<CaseSummary>,
}

impl PreprocessReport {
    /// 某划分的 (切片总数, 正样本切片总数).
    pub fn totals(&self, split: Split) -> (usize, usize) {
        self.cases
            .iter()
            .filter(|c| c.split == split)
            .fold((0, 0), |(n, p), c| (n + c.slices, p + c.positive))
    }
}

/// 预处理单个病例, 切片写入 `case_dir/data` 与 `case_dir/masks`.
///
/// 返回 (写出的切片个数, 含肿瘤的切片个数).
pub fn preprocess_case(
    data: &CtData3d,
    case_dir: &Path,
    config: &PreprocessConfig,
) -> Result<(usize, usize), DatasetError> {
    let data_dir = case_dir.join("data");
    let mask_dir = case_dir.join("masks");
    fs::create_dir_all(&data_dir)?;
    fs::create_dir_all(&mask_dir)?;

    let preview_dir = case_dir.join("preview");
    if config.preview {
        fs::create_dir_all(&preview_dir)?;
    }

    let mut written = 0;
    let mut positive = 0;
    for (i, (scan, label)) in data.slice_iter().skip(config.skip_leading).enumerate() {
        let normalized = scan.data().mapv(|hu| hu / config.hu_scale);
        let image = resize_bilinear(normalized.view(), config.target);
        let mask = resize_nearest(label.array_view(), config.target);

        let has_tumor = mask.iter().any(|&p| crate::consts::gray::is_tumor(p));
        if has_tumor && config.preview {
            scan.save(preview_dir.join(format!("{i}-scan.png")))?;
            label.save(preview_dir.join(format!("{i}-mask.png")))?;
        }
        positive += usize::from(has_tumor);
        write_npy(data_dir.join(format!("{i}.npy")), &image)?;
        write_npy(mask_dir.join(format!("{i}.npy")), &mask)?;
        written += 1;
    }
    Ok((written, positive))
}

/// 预处理 Task06 Lung 数据集目录 `raw_root`, 结果写入 `out_root/{train,val}`.
pub fn preprocess_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    raw_root: P,
    out_root: Q,
    config: &PreprocessConfig,
) -> Result<PreprocessReport, DatasetError> {
    let names = task06::case_names(raw_root.as_ref())?;
    log::info!("共发现 {} 个病例", names.len());
    let (train, val) = task06::split_cases(names, config.val_cases)?;

    let mut report = PreprocessReport::default();
    for (split, cases) in [(Split::Train, train), (Split::Val, val)] {
        for (case, data) in task06::ct_loader(cases, raw_root.as_ref()) {
            let data = data?;
            if data.len_z() <= config.skip_leading {
                log::warn!(
                    "病例 {case} 只有 {} 个切片, 不足以丢弃前 {} 个",
                    data.len_z(),
                    config.skip_leading
                );
            }
            let case_dir = out_root.as_ref().join(split.dir_name()).join(&case);
            let (slices, positive) = preprocess_case(&data, &case_dir, config)?;
            log::info!(
                "[{split}] {case}: {slices} 个切片, {positive} 个含肿瘤, 原始形状 {:?}",
                data.scan.shape()
            );
            report.cases.push(CaseSummary {
                case,
                split,
                slices,
                positive,
            });
        }
    }
    Ok(report)
}
