//! 二维切片分割模型.
//!
//! 模型是 [`burn`] 的 [`Module`], 把 `(b, 1, H, W)` 的扫描映射为同形状的 logits.
//! 训练在 [`TrainBackend`] (ndarray CPU 后端 + 自动微分) 上进行; 验证, 评估和推理
//! 通过 [`AutodiffModule::valid`] 切换到不追踪梯度的 [`InferBackend`].
//!
//! 数据管线仍以 `ndarray` 数组为单位, [`to_tensor`] 和 [`to_array`] 负责两者之间的转换.
//!
//! [`AutodiffModule::valid`]: burn::module::AutodiffModule::valid

use burn::backend::Autodiff;
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use ndarray::{Array4, ArrayView4};

mod conv;

pub use conv::ShallowConvNet;

/// 推理后端.
pub type InferBackend = NdArray<f32>;

/// 训练后端.
pub type TrainBackend = Autodiff<InferBackend>;

/// 分割模型: `(b, 1, H, W)` 扫描 -> `(b, 1, H, W)` logits.
pub trait SegModel<B: Backend>: Module<B> {
    /// 前向传播.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// `ndarray` 数组 -> 张量.
pub fn to_tensor<B: Backend>(array: ArrayView4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = array.dim();
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [n, c, h, w]), device)
}

/// 张量 -> `ndarray` 数组.
pub fn to_array<B: Backend>(tensor: Tensor<B, 4>) -> Array4<f32> {
    let [n, c, h, w] = tensor.dims();
    let values: Vec<f32> = tensor.into_data().iter::<f32>().collect();
    Array4::from_shape_fn((n, c, h, w), |(a, b, i, j)| values[((a * c + b) * h + i) * w + j])
}

/// 对 `ndarray` 输入做一次前向传播.
pub fn predict<B, M>(model: &M, images: ArrayView4<f32>, device: &B::Device) -> Array4<f32>
where
    B: Backend,
    M: SegModel<B>,
{
    to_array(model.forward(to_tensor(images, device)))
}
