//! 训练与推理程序依赖的通用组件.

use lung_berry::CtWindow;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 数据加载线程数: 不超过可并行核心数.
#[inline]
pub fn workers(requested: usize) -> usize {
    requested.clamp(1, cpus())
}

/// 创建适用于可视化归一化后肺部 CT 切片的窗口.
/// 该窗口对应原始 HU 值的窗位 -600, 窗宽 1500.
#[inline]
pub fn lung_window() -> CtWindow {
    CtWindow::from_lung_normalized()
}
