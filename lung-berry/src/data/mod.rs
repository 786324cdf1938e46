use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::{Idx2d, Idx3d};

pub mod resize;
pub mod slice;
pub mod window;

pub use slice::{ImgWriteVis, LabelSlice, ScanSlice};
pub use window::CtWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 为内存中直接构建的体数据生成一个最小 header.
///
/// `pix_dim` 按照 \[z, h, w\] 格式给出, 单位为毫米.
fn synthetic_header((z, h, w): Idx3d, pix_dim: [f32; 3]) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
    let [pz, ph, pw] = pix_dim;
    header.pixdim = [1.0, pw, ph, pz, 0.0, 0.0, 0.0, 0.0];
    header.intent_name[..4].copy_from_slice(b"fake");
    header
}

/// 读取 nii 文件, 并将数据从 [W, H, z] 转置为行优先的 [z, H, W].
///
/// nifti 的数据元素约束较多, 这里用宏分别为 `f32` 和 `u8` 展开.
macro_rules! read_volume {
    ($path: expr, $elem: ty) => {{
        let obj = ReaderOptions::new().read_file($path)?;
        let header = Box::new(obj.header().clone());

        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<$elem>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<$elem>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();
        (header, data)
    }};
}

/// 3D CT nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 判断该结构是否是由 `from_array` 在内存中拼接的.
    #[inline]
    fn is_faked(&self) -> bool {
        self.header().intent_name.starts_with(b"fake")
    }
}

/// nii 格式 3D CT 扫描, 包括 header 和 CT 扫描 (HU). HU 值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct CtScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for CtScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for CtScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl CtScan {
    /// 打开 nii (或 nii.gz) 文件格式的 3D CT 扫描. `path` 为文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let (header, data) = read_volume!(path.as_ref(), f32);
        Ok(Self { header, data })
    }

    /// 以 \[z, H, W\] 格式的数据直接创建扫描. 体素分辨率视为各向同性的 1mm.
    pub fn from_array(data: Array3<f32>) -> Self {
        let header = synthetic_header(data.dim(), [1.0; 3]);
        Self { header, data }
    }

    /// 获取 3D 扫描 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ScanSlice<'_> {
        ScanSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 扫描水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ScanSlice> {
        self.data.axis_iter(Axis(0)).map(ScanSlice::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 将 HU 值除以 `scale` 得到归一化的体数据.
    ///
    /// 训练使用的切片均以 [`crate::consts::HU_SCALE`] 归一化,
    /// 推理时应使用同一个值.
    pub fn normalized(&self, scale: f32) -> Array3<f32> {
        assert!(scale.is_finite() && scale != 0.0, "归一化因子必须是非零有限值");
        self.data.mapv(|hu| hu / scale)
    }
}

/// nii 格式 3D CT 标注, 包括 header 和真值标签. 标签值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct CtLabel {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for CtLabel {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for CtLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl CtLabel {
    /// 打开 nii (或 nii.gz) 文件格式的 3D CT 标注. `path` 为文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let (header, data) = read_volume!(path.as_ref(), u8);
        Ok(Self { header, data })
    }

    /// 以 \[z, H, W\] 格式的数据直接创建标注. 体素分辨率视为各向同性的 1mm.
    pub fn from_array(data: Array3<u8>) -> Self {
        let header = synthetic_header(data.dim(), [1.0; 3]);
        Self { header, data }
    }

    /// 获取 3D 标注 z 空间的第 `z_index` 层不可变切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> LabelSlice {
        LabelSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 标注水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = LabelSlice> {
        self.data.axis_iter(Axis(0)).map(LabelSlice::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取 3D 标注中肿瘤体素个数.
    #[inline]
    pub fn tumor_count(&self) -> usize {
        self.data.iter().filter(|p| is_tumor(**p)).count()
    }

    /// 获取包含肿瘤的水平切片个数.
    pub fn tumor_slice_count(&self) -> usize {
        self.slice_iter().filter(LabelSlice::has_tumor).count()
    }
}

/// nii 格式的 3D CT 扫描与对应的标注.
///
/// 该结构完全透明, 仅包含两个公开的 `scan` 和 `label` 子结构,
/// 用户可以直接使用它们来实现相关上层功能.
#[derive(Debug, Clone)]
pub struct CtData3d {
    /// 3D CT 扫描.
    pub scan: CtScan,

    /// 3D CT 标注.
    pub label: CtLabel,
}

impl CtData3d {
    /// 分别打开 nii 文件格式的 3D CT 扫描和对应标注. 如果任一文件打开失败, 则返回 `Err`.
    /// 若两个文件的数据文件形状不一致, 则程序 `panic`.
    pub fn open(scan_path: impl AsRef<Path>, label_path: impl AsRef<Path>) -> nifti::Result<Self> {
        let scan = CtScan::open(scan_path.as_ref())?;
        let label = CtLabel::open(label_path.as_ref())?;
        Ok(Self::from_parts(scan, label))
    }

    /// 由内存中的扫描与标注拼接. 形状不一致时 panic.
    pub fn from_parts(scan: CtScan, label: CtLabel) -> Self {
        assert_eq!(scan.shape(), label.shape(), "CT 扫描和标注形状不一致");
        Self { scan, label }
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.label.len_z()
    }

    /// 依次获取 3D 扫描和 3D 标注 z 空间的第 `z_index` 层不可变切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> (ScanSlice<'_>, LabelSlice<'_>) {
        (self.scan.slice_at(z_index), self.label.slice_at(z_index))
    }

    /// 获取能按升序迭代 3D 水平 (扫描, 标注) 不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = (ScanSlice, LabelSlice)> {
        self.scan.slice_iter().zip(self.label.slice_iter())
    }
}
