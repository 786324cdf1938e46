//! checkpoint 的持久化与 top-K 保留.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use binary_heap_plus::BinaryHeap;
use burn::module::{AutodiffModule, Module};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder, RecorderError};
use burn::tensor::backend::{AutodiffBackend, Backend};
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::optim::AdamRecord;
use crate::task::ModelState;

type BytesRecorder = BinBytesRecorder<FullPrecisionSettings>;

#[inline]
fn record_error(e: RecorderError) -> CheckpointError {
    CheckpointError::Record(format!("{e:?}"))
}

/// 以全精度编码 `record`.
fn encode<B: Backend, R: Record<B>>(record: R) -> Result<Vec<u8>, CheckpointError> {
    <BytesRecorder as Recorder<B>>::record(&BytesRecorder::default(), record, ()).map_err(record_error)
}

/// [`encode`] 的逆过程, 张量创建在 `device` 上.
fn decode<B: Backend, R: Record<B>>(bytes: Vec<u8>, device: &B::Device) -> Result<R, CheckpointError> {
    <BytesRecorder as Recorder<B>>::load(&BytesRecorder::default(), bytes, device).map_err(record_error)
}

/// 模型参数 + 优化器状态 + 训练进度.
///
/// 模型和优化器的状态以 [`BinBytesRecorder`] 编码为字节, 外层再以 `bincode` 写盘.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 所在 epoch (从 0 开始).
    pub epoch: u64,

    /// 全局训练 step.
    pub step: u64,

    /// 该 epoch 的验证损失.
    pub val_loss: f32,

    /// 模型参数个数.
    pub num_params: usize,

    /// 优化器已执行的更新次数.
    pub optimizer_steps: u64,

    /// 编码后的模型参数.
    pub model: Vec<u8>,

    /// 编码后的优化器矩估计.
    pub optimizer: Vec<u8>,
}

impl Checkpoint {
    /// checkpoint 文件扩展名.
    pub const EXTENSION: &'static str = "ckpt";

    /// 从当前状态复制一份 checkpoint.
    pub fn capture<B, M>(
        state: &ModelState<B, M>,
        epoch: u64,
        step: u64,
        val_loss: f32,
    ) -> Result<Self, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        Ok(Self {
            epoch,
            step,
            val_loss,
            num_params: state.model.num_params(),
            optimizer_steps: state.optimizer.steps(),
            model: encode::<B, _>(state.model.clone().into_record())?,
            optimizer: encode::<B, _>(state.optimizer.to_record())?,
        })
    }

    /// 标准文件名, 如 `epoch=3-step=1200-val_loss=0.0412.ckpt`.
    pub fn file_name(&self) -> String {
        format!(
            "epoch={}-step={}-val_loss={:.4}.{}",
            self.epoch,
            self.step,
            self.val_loss,
            Self::EXTENSION
        )
    }

    /// 保存到 `path`.
    ///
    /// 先写入同目录的临时文件, 成功后再重命名, 因此中途失败不会留下残缺的 checkpoint.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let written = (|| -> Result<(), CheckpointError> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// 从 `path` 读取.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }

    /// 将参数与优化器状态装入 `state`, 得到等价的模型状态.
    ///
    /// 参数个数与 `state` 中的模型不一致, 或状态无法解码时返回 `Err`.
    pub fn restore<B, M>(self, state: ModelState<B, M>) -> Result<ModelState<B, M>, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let expected = state.model.num_params();
        if expected != self.num_params {
            return Err(CheckpointError::ParamCountMismatch(expected, self.num_params));
        }
        let ModelState {
            model,
            optimizer,
            device,
        } = state;
        let record = decode::<B, M::Record>(self.model, &device)?;
        let moments = decode::<B, AdamRecord<B, M>>(self.optimizer, &device)?;
        Ok(ModelState::new(
            model.load_record(record),
            optimizer.resume(moments, self.optimizer_steps),
            device,
        ))
    }
}

/// 一个已保存的 checkpoint. 按验证损失排序.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SavedCheckpoint {
    /// 验证损失.
    pub val_loss: NotNan<f32>,

    /// 文件路径.
    pub path: PathBuf,
}

/// 按验证损失保留最优 (最小) 的 K 个 checkpoint.
///
/// 内部是容量为 K 的大顶堆, 堆顶是当前保留的最差 checkpoint.
/// 新 checkpoint 优于堆顶时替换堆顶, 并删除被淘汰的文件.
#[derive(Debug)]
pub struct TopKCheckpoints {
    dir: PathBuf,
    capacity: usize,
    heap: BinaryHeap<SavedCheckpoint>,
}

impl TopKCheckpoints {
    /// 在 `dir` 下保留至多 `capacity` 个 checkpoint. `capacity == 0` 表示不保存.
    pub fn new<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
        })
    }

    /// 当前保留的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// 是否尚未保留任何 checkpoint.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// 验证损失最小的 checkpoint.
    pub fn best(&self) -> Option<&SavedCheckpoint> {
        self.heap.iter().min()
    }

    /// 按验证损失升序排列的全部 checkpoint.
    pub fn sorted(&self) -> Vec<&SavedCheckpoint> {
        let mut ans: Vec<_> = self.heap.iter().collect();
        ans.sort_unstable();
        ans
    }

    /// 提交一个 checkpoint. 若它进入 top-K 则写盘并返回其路径, 否则返回 `None`.
    ///
    /// 验证损失为 NaN 的 checkpoint 永远不会被保留.
    pub fn offer(&mut self, ckpt: &Checkpoint) -> Result<Option<PathBuf>, CheckpointError> {
        let Ok(val_loss) = NotNan::new(ckpt.val_loss) else {
            log::warn!("验证损失为 NaN, 跳过 checkpoint (epoch {})", ckpt.epoch);
            return Ok(None);
        };
        if self.capacity == 0 {
            return Ok(None);
        }
        if self.heap.len() >= self.capacity {
            match self.heap.peek() {
                Some(worst) if val_loss < worst.val_loss => {}
                _ => return Ok(None),
            }
        }

        let path = self.dir.join(ckpt.file_name());
        ckpt.save(&path)?;
        if self.heap.len() >= self.capacity {
            if let Some(evicted) = self.heap.pop() {
                if let Err(e) = fs::remove_file(&evicted.path) {
                    log::warn!("无法删除被淘汰的 checkpoint {}: {e}", evicted.path.display());
                }
            }
        }
        self.heap.push(SavedCheckpoint {
            val_loss,
            path: path.clone(),
        });
        Ok(Some(path))
    }
}
