//! 肺肿瘤 2D 切片分割命令行程序.
//!
//! ```text
//! seg2d preprocess
//! seg2d train
//! seg2d evaluate <checkpoint> [threshold]
//! seg2d segment <checkpoint> <scan.nii.gz> <out_dir> [threshold]
//! ```
//!
//! 路径与训练超参数均由 `LUNG_*` 环境变量给出, 日志等级由 `LUNG_LOG` 给出 (默认 `info`).

mod report;
mod runner;

use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::process::ExitCode;
use std::str::FromStr;

const USAGE: &str = "用法: seg2d <preprocess | train | evaluate | segment> [参数...]";

fn main() -> ExitCode {
    let level = std::env::var("LUNG_LOG")
        .ok()
        .and_then(|s| LevelFilter::from_str(&s).ok())
        .unwrap_or(LevelFilter::Info);
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("无法初始化日志: {e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((cmd, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let result = match cmd.as_str() {
        "preprocess" => runner::preprocess(),
        "train" => runner::train(),
        "evaluate" => runner::evaluate_checkpoint(rest),
        "segment" => runner::segment(rest),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{cmd} 失败: {e}");
            ExitCode::FAILURE
        }
    }
}
