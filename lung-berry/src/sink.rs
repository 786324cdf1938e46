//! 指标记录.
//!
//! 记录是只写的旁路: 任何 sink 的失败都不能影响训练的控制流或数值结果,
//! 因此 [`MetricSink`] 的方法不返回错误, 实现自行以 `warn` 级别报告.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use image::RgbImage;

/// 接收 (名称, 标量, step) 与 (标签, 图像, step) 记录.
pub trait MetricSink {
    /// 记录一个标量.
    fn log_scalar(&mut self, name: &str, value: f64, step: u64);

    /// 记录一张图像.
    fn log_figure(&mut self, tag: &str, figure: &RgbImage, step: u64);
}

impl<S: MetricSink + ?Sized> MetricSink for &mut S {
    #[inline]
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) {
        (**self).log_scalar(name, value, step)
    }

    #[inline]
    fn log_figure(&mut self, tag: &str, figure: &RgbImage, step: u64) {
        (**self).log_figure(tag, figure, step)
    }
}

/// 一条标量记录.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarRecord {
    /// 名称, 如 `"Train Loss"`.
    pub name: String,

    /// 值.
    pub value: f64,

    /// 全局 step.
    pub step: u64,
}

/// 把所有记录保存在内存中.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    /// 标量记录, 按写入顺序.
    pub scalars: Vec<ScalarRecord>,

    /// 图像记录 (标签, step, 图像), 按写入顺序.
    pub figures: Vec<(String, u64, RgbImage)>,
}

impl MemorySink {
    /// 名称为 `name` 的所有标量值, 按写入顺序.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.scalars
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .collect()
    }
}

impl MetricSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) {
        self.scalars.push(ScalarRecord {
            name: name.to_owned(),
            value,
            step,
        });
    }

    fn log_figure(&mut self, tag: &str, figure: &RgbImage, step: u64) {
        self.figures.push((tag.to_owned(), step, figure.clone()));
    }
}

/// 写入目录的 sink:
///
/// ```text
/// {root}/scalars.csv               name,step,value (RFC 4180 引号转义)
/// {root}/figures/{tag}-{step}.png
/// ```
#[derive(Debug)]
pub struct DirSink {
    root: PathBuf,
    scalars: Option<csv::Writer<File>>,
}

impl DirSink {
    /// 标量文件名.
    pub const SCALARS: &'static str = "scalars.csv";

    /// 图像子目录名.
    pub const FIGURES: &'static str = "figures";

    /// 在 `root` 下创建 (或追加到已有的) 记录文件.
    ///
    /// 无法创建目录或文件时只记录警告, 之后的写入都会被丢弃.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let scalars = Self::open_scalars(&root)
            .map_err(|e| log::warn!("无法创建指标文件 {}: {e}", root.display()))
            .ok();
        Self { root, scalars }
    }

    fn open_scalars(root: &Path) -> csv::Result<csv::Writer<File>> {
        fs::create_dir_all(root.join(Self::FIGURES))?;
        let path = root.join(Self::SCALARS);
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record(["name", "step", "value"])?;
            writer.flush()?;
        }
        Ok(writer)
    }

    /// 根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MetricSink for DirSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: u64) {
        log::debug!("{name} = {value:.6} @ {step}");
        if let Some(writer) = self.scalars.as_mut() {
            let written = writer
                .write_record([name, step.to_string().as_str(), value.to_string().as_str()])
                .and_then(|()| writer.flush().map_err(csv::Error::from));
            if let Err(e) = written {
                log::warn!("写入指标 {name} 失败: {e}");
            }
        }
    }

    fn log_figure(&mut self, tag: &str, figure: &RgbImage, step: u64) {
        let path = self
            .root
            .join(Self::FIGURES)
            .join(format!("{tag}-{step}.png"));
        if let Err(e) = figure.save(&path) {
            log::warn!("保存图像 {} 失败: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::default();
        sink.log_scalar("Train Loss", 0.5, 1);
        sink.log_scalar("Val Loss", 0.7, 1);
        sink.log_scalar("Train Loss", 0.4, 2);
        sink.log_figure("Train", &RgbImage::new(2, 1), 0);
        assert_eq!(sink.values("Train Loss"), vec![0.5, 0.4]);
        assert_eq!(sink.figures.len(), 1);
        assert_eq!(sink.figures[0].0, "Train");
    }

    #[test]
    fn test_dir_sink() {
        let mut root = std::env::temp_dir();
        root.push(format!("lung-berry-sink-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);

        {
            let mut sink = DirSink::new(&root);
            sink.log_scalar("Train Loss", 0.25, 3);
            sink.log_figure("Val", &RgbImage::new(4, 4), 50);
        }
        {
            let mut sink = DirSink::new(&root);
            sink.log_scalar("Val Dice", 1.0, 4);
        }

        let csv = fs::read_to_string(root.join(DirSink::SCALARS)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["name,step,value", "Train Loss,3,0.25", "Val Dice,4,1"]);
        assert!(root.join(DirSink::FIGURES).join("Val-50.png").is_file());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_dir_sink_quotes_names() {
        let mut root = std::env::temp_dir();
        root.push(format!("lung-berry-sink-quote-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);

        {
            let mut sink = DirSink::new(&root);
            sink.log_scalar("Val Loss, smoothed", 0.5, 5);
            sink.log_scalar("say \"hi\"", 2.0, 6);
        }

        let mut reader = csv::Reader::from_path(root.join(DirSink::SCALARS)).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_owned).collect();
        assert_eq!(headers, vec!["name", "step", "value"]);
        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_owned).collect())
            .collect();
        assert_eq!(
            rows,
            vec![
                vec!["Val Loss, smoothed".to_owned(), "5".to_owned(), "0.5".to_owned()],
                vec!["say \"hi\"".to_owned(), "6".to_owned(), "2".to_owned()],
            ]
        );
        fs::remove_dir_all(&root).unwrap();
    }
}
