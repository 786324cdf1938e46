//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::slice::{ImgWriteVis, LabelSlice, ScanSlice};
pub use crate::data::window::CtWindow;
pub use crate::data::{CtData3d, CtLabel, CtScan, NiftiHeaderAttr};

pub use crate::consts::gray::{LUNG_BACKGROUND, LUNG_TUMOR};
pub use crate::consts::{ElemType, SLICE_SHAPE};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{self, InMemoryDataset, NpySliceDataset, RandomAffine, Sample, SliceDataset, Split};

pub use crate::error::{DegenerateDatasetError, RunError, ShapeMismatchError, StepError};

pub use crate::checkpoint::{Checkpoint, TopKCheckpoints};
pub use crate::eval::{evaluate, EvalMode, EvalReport};
pub use crate::loader::{Batch, DataLoader};
pub use crate::loss::Criterion;
pub use crate::model::{InferBackend, SegModel, ShallowConvNet, TrainBackend};
pub use crate::optim::AdamOptimizer;
pub use crate::sampler::{Sampler, SequentialSampler, WeightedSampler};
pub use crate::score::dice_score;
pub use crate::sink::{DirSink, MemorySink, MetricSink};
pub use crate::task::{ModelState, TumorSegmentation};
pub use crate::trainer::{TrainConfig, Trainer};
pub use crate::volume::{render_frames, VolumeSegmenter};
