use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::SegModel;

/// 3x3 卷积核的抽头数.
const TAPS: usize = 9;

/// 浅层全卷积网络:
///
/// ```text
/// x (1 通道) --3x3 conv, zero padding--> z (C 通道) --ReLU--> a --1x1 conv--> logits (1 通道)
/// ```
///
/// 输出与输入分辨率相同, 因此可以处理任意分辨率的切片.
///
/// 扁平参数布局 (见 [`ShallowConvNet::flat_params`]): `[W1 (C*9), b1 (C), W2 (C), b2 (1)]`,
/// 其中 `W1[k]` 按行优先存放 3x3 核.
#[derive(Module, Debug)]
pub struct ShallowConvNet<B: Backend> {
    hidden: Conv2d<B>,
    head: Conv2d<B>,
    activation: Relu,
}

/// 一维参数张量.
fn param1<B: Backend>(values: &[f32], device: &B::Device) -> Param<Tensor<B, 1>> {
    let t = Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device);
    Param::from_tensor(t.require_grad())
}

/// 四维参数张量.
fn param4<B: Backend>(values: &[f32], shape: [usize; 4], device: &B::Device) -> Param<Tensor<B, 4>> {
    let t = Tensor::from_data(TensorData::new(values.to_vec(), shape), device);
    Param::from_tensor(t.require_grad())
}

/// 按顺序展开张量的全部元素.
fn flatten_into<B: Backend, const D: usize>(t: Tensor<B, D>, out: &mut Vec<f32>) {
    out.extend(t.into_data().iter::<f32>());
}

impl<B: Backend> ShallowConvNet<B> {
    /// 以固定种子随机初始化 (He uniform, 偏置为 0). 相同种子得到相同参数.
    ///
    /// # 注意
    ///
    /// `channels` 必须为正, 否则程序 panic.
    pub fn new(channels: usize, seed: u64, device: &B::Device) -> Self {
        assert!(channels > 0, "隐藏通道数必须为正");
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = vec![0.0; Self::param_count(channels)];

        let a1 = (6.0 / TAPS as f32).sqrt();
        let a2 = (6.0 / channels as f32).sqrt();
        params[..channels * TAPS]
            .iter_mut()
            .for_each(|p| *p = rng.gen_range(-a1..a1));
        params[channels * (TAPS + 1)..channels * (TAPS + 2)]
            .iter_mut()
            .for_each(|p| *p = rng.gen_range(-a2..a2));
        Self::from_params(channels, &params, device)
    }

    /// 由扁平参数构建.
    ///
    /// # 注意
    ///
    /// `params.len()` 必须等于 [`ShallowConvNet::param_count`], 否则程序 panic.
    pub fn from_params(channels: usize, params: &[f32], device: &B::Device) -> Self {
        assert_eq!(params.len(), Self::param_count(channels), "参数个数不匹配");
        let (w1, rest) = params.split_at(channels * TAPS);
        let (b1, rest) = rest.split_at(channels);
        let (w2, b2) = rest.split_at(channels);

        let mut hidden = Conv2dConfig::new([1, channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        hidden.weight = param4(w1, [channels, 1, 3, 3], device);
        hidden.bias = Some(param1(b1, device));

        let mut head = Conv2dConfig::new([channels, 1], [1, 1]).init(device);
        head.weight = param4(w2, [1, channels, 1, 1], device);
        head.bias = Some(param1(b2, device));

        Self {
            hidden,
            head,
            activation: Relu::new(),
        }
    }

    /// 隐藏通道数为 `channels` 时的参数总数.
    #[inline]
    pub const fn param_count(channels: usize) -> usize {
        channels * (TAPS + 2) + 1
    }

    /// 由参数总数反推隐藏通道数. 不存在对应的通道数时返回 `None`.
    pub fn channels_for(num_params: usize) -> Option<usize> {
        let c = num_params.checked_sub(1)? / (TAPS + 2);
        (c > 0 && Self::param_count(c) == num_params).then_some(c)
    }

    /// 隐藏通道数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.hidden.weight.val().dims()[0]
    }

    /// 按文档中的布局展开的全部参数.
    pub fn flat_params(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(Self::param_count(self.channels()));
        flatten_into(self.hidden.weight.val(), &mut out);
        if let Some(b) = &self.hidden.bias {
            flatten_into(b.val(), &mut out);
        }
        flatten_into(self.head.weight.val(), &mut out);
        if let Some(b) = &self.head.bias {
            flatten_into(b.val(), &mut out);
        }
        out
    }
}

impl<B: Backend> SegModel<B> for ShallowConvNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        assert_eq!(images.dims()[1], 1, "输入必须为单通道");
        let z = self.hidden.forward(images);
        let a = self.activation.forward(z);
        self.head.forward(a)
    }
}
