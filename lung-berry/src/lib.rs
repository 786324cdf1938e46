#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供 Task06 Lung 数据集的 CT 文件结构化信息, 以及肺肿瘤二维切片分割的
//! 训练, 验证, 评估和整体推理.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 目前主要负责处理 Task06 Lung (Medical Segmentation Decathlon) 数据,
//!   没有对其它源的数据进行直接适配 (但如果新数据按照相同模式进行组织, 也可以工作).
//! 2. 在非期望情况下 (违反参数前置条件), 程序会直接 panic, 而不会导致内存错误.
//!   数据和 I/O 相关的失败则以 `Result` 返回.
//!
//! # 开发计划
//!
//! ### CT 体数据读取与切片访问 ✅
//!
//! 实现位于 `lung-berry/src/data`.
//!
//! ### CT window 视图 ✅
//!
//! 提供一个独立的 CT 窗口对象, 以便将 CT HU 值 (或归一化后的值) 转换为 8-bit 灰度值.
//!
//! 实现位于 `lung-berry/src/data/window.rs`.
//!
//! ### 预处理: 3D 病例 -> 2D npy 切片 ✅
//!
//! 丢弃起始切片, HU 归一化, 缩放到 256x256, 按病例划分训练/验证集.
//!
//! 实现位于 `lung-berry/src/preprocess.rs`.
//!
//! ### 类别不平衡的加权采样 ✅
//!
//! 含肿瘤切片的权重为 `负样本数 / 正样本数`, 每个 epoch 重新抽取.
//!
//! 实现位于 `lung-berry/src/sampler.rs`.
//!
//! ### Dice 重叠系数 ✅
//!
//! 分母为零 (预测与真值都为空) 时固定返回 `1.0`.
//!
//! 实现位于 `lung-berry/src/score.rs`.
//!
//! ### 训练/验证单步与训练循环 ✅
//!
//! 1. 模型状态由调用方显式持有, 验证步只借用不可变引用. ✅
//! 2. 交叉熵驱动梯度, Dice 仅作诊断记录. ✅
//! 3. top-K checkpoint 以大顶堆维护. ✅
//!
//! 实现位于 `lung-berry/src/task.rs` 与 `lung-berry/src/trainer.rs`.
//!
//! ### 整体评估与 3D 逐切片推理 ✅
//!
//! 实现位于 `lung-berry/src/eval.rs` 与 `lung-berry/src/volume.rs`.
//!
//! ### 更深的分割网络 ⌛️
//!
//! 目前只提供 [`model::ShallowConvNet`]. 任何实现 [`model::SegModel`] 的 `burn` 模块都可以直接接入,
//! 训练在 `burn-ndarray` CPU 后端上以自动微分完成.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D CT nii 文件基础数据结构.
mod data;

pub use data::{
    resize, CtData3d, CtLabel, CtScan, CtWindow, ImgWriteVis, LabelSlice, NiftiHeaderAttr,
    ScanSlice,
};

pub mod consts;
pub mod error;

pub mod dataset;
pub use dataset::Split;

pub mod preprocess;

pub mod loader;
pub mod sampler;
pub mod score;

pub mod loss;
pub mod model;
pub mod optim;

pub mod checkpoint;
pub mod figure;
pub mod sink;
pub mod task;
pub mod trainer;

pub mod eval;
pub mod volume;

pub mod prelude;
