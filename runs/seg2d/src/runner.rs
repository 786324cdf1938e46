//! 程序运行函数.

use crate::report;
use lung_berry::checkpoint::Checkpoint;
use lung_berry::consts::{DEFAULT_THRESHOLD, HU_SCALE, SLICE_SHAPE};
use lung_berry::dataset::NpySliceDataset;
use lung_berry::error::RunError;
use lung_berry::eval::{evaluate, EvalMode};
use lung_berry::model::{ShallowConvNet, TrainBackend};
use lung_berry::optim::AdamOptimizer;
use lung_berry::preprocess::{preprocess_dataset, PreprocessConfig};
use lung_berry::sink::DirSink;
use lung_berry::task::ModelState;
use lung_berry::trainer::{TrainConfig, Trainer};
use lung_berry::volume::{render_frames, VolumeSegmenter};
use lung_berry::{CtScan, Split};
use std::error::Error;
use std::path::Path;
use utils::loader;

/// 所有子命令的结果类型.
pub type RunResult = Result<(), Box<dyn Error>>;

/// 模型隐藏通道数.
const HIDDEN_CHANNELS: usize = 8;

type Net = ShallowConvNet<TrainBackend>;

/// 从 checkpoint 恢复模型状态.
fn restore(ckpt_path: &Path) -> Result<ModelState<TrainBackend, Net>, Box<dyn Error>> {
    let ckpt = Checkpoint::load(ckpt_path)?;
    let channels = Net::channels_for(ckpt.num_params)
        .ok_or_else(|| format!("{} 不是 ShallowConvNet checkpoint", ckpt_path.display()))?;
    log::info!(
        "载入 checkpoint {} (epoch {}, val loss {:.5})",
        ckpt_path.display(),
        ckpt.epoch,
        ckpt.val_loss
    );
    let device = Default::default();
    let state = ModelState::new(Net::new(channels, 0, &device), AdamOptimizer::default(), device);
    Ok(ckpt.restore(state)?)
}

/// 打开切片数据集的某个划分, 错误标注上划分名.
fn open_split(split: Split) -> Result<NpySliceDataset, RunError> {
    loader::split_dataset(loader::slice_dir_from_env_or_home(), split)
        .map_err(|e| RunError::Dataset(split, e))
}

/// 解析可选的阈值参数.
fn parse_threshold(arg: Option<&str>) -> Result<Option<f32>, Box<dyn Error>> {
    match arg {
        None => Ok(None),
        Some(s) => {
            let t: f32 = s.parse()?;
            if !(0.0..1.0).contains(&t) {
                return Err(format!("阈值 {t} 必须位于 [0, 1)").into());
            }
            Ok(Some(t))
        }
    }
}

/// `preprocess`: 原始 nii 数据集 -> npy 切片. `$LUNG_PREVIEW=1` 时同时写出 PNG 预览.
pub fn preprocess() -> RunResult {
    let raw = loader::raw_dir_from_env_or_home();
    let out = loader::slice_dir_from_env_or_home();
    if !raw.is_dir() {
        return Err(format!("数据集目录 {} 不存在", raw.display()).into());
    }
    log::info!("预处理 {} -> {}", raw.display(), out.display());

    let config = PreprocessConfig {
        preview: std::env::var("LUNG_PREVIEW").is_ok_and(|v| v == "1"),
        ..PreprocessConfig::default()
    };
    let r = preprocess_dataset(&raw, &out, &config)?;
    report::print_with(|w| report::describe_preprocess(&r, w))?;
    Ok(())
}

/// `train`: 加权采样训练, 每个 epoch 验证并保留 top-K checkpoint.
pub fn train() -> RunResult {
    let config = TrainConfig::from_env()?;
    lung_berry::loader::init_workers(utils::workers(config.num_workers));
    log::info!("训练配置: {config:?}");

    let train = open_split(Split::Train)?;
    let val = open_split(Split::Val)?;

    let run_dir = loader::run_dir_from_env_or_home();
    let mut sink = DirSink::new(&run_dir);
    let trainer = Trainer::new(config);
    let device = Default::default();
    let model = Net::new(HIDDEN_CHANNELS, trainer.config().seed, &device);
    let mut state = trainer.task().init_state(model, device);

    let r = trainer.fit(
        &mut state,
        &train,
        &val,
        Some(run_dir.join("checkpoints").as_path()),
        &mut sink,
    )?;
    report::print_with(|w| report::describe_fit(&r, w))?;
    Ok(())
}

/// `evaluate <ckpt> [threshold]`: 在验证集上计算整体 Dice.
///
/// 不给出阈值时使用 sigmoid 概率 (软 Dice).
pub fn evaluate_checkpoint(args: &[String]) -> RunResult {
    let ckpt = args.first().ok_or("用法: seg2d evaluate <checkpoint> [threshold]")?;
    let mode = match parse_threshold(args.get(1).map(String::as_str))? {
        Some(t) => EvalMode::Hard(t),
        None => EvalMode::Soft,
    };
    let state = restore(Path::new(ckpt))?;
    let val = open_split(Split::Val)?;

    let r = evaluate(&state, &val, mode)?;
    report::print_with(|w| report::describe_eval(&r, w))?;
    Ok(())
}

/// `segment <ckpt> <scan.nii.gz> <out_dir> [threshold]`: 对整个 3D 扫描逐切片分割并渲染每一帧.
pub fn segment(args: &[String]) -> RunResult {
    const USAGE: &str = "用法: seg2d segment <checkpoint> <scan.nii.gz> <out_dir> [threshold]";
    let [ckpt, scan, out, ..] = args else {
        return Err(USAGE.into());
    };
    let threshold = parse_threshold(args.get(3).map(String::as_str))?.unwrap_or(DEFAULT_THRESHOLD);

    let state = restore(Path::new(ckpt))?;
    let scan = CtScan::open(scan)?;
    let seg = VolumeSegmenter::new(SLICE_SHAPE, threshold).segment_scan(&state, &scan, HU_SCALE);
    let frames = render_frames(&seg, out, utils::lung_window())?;

    log::info!(
        "{} 帧写入 {}, 其中 {} 帧检出肿瘤",
        frames.len(),
        out,
        seg.tumor_slices().len()
    );
    Ok(())
}
