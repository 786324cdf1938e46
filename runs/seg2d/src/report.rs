//! 运行结果输出.

use lung_berry::eval::EvalReport;
use lung_berry::preprocess::PreprocessReport;
use lung_berry::trainer::FitReport;
use lung_berry::Split;
use std::io::{self, Write};

const S4: &str = "    ";

/// 将预处理结果写进 `w` 中.
pub fn describe_preprocess<W: Write>(r: &PreprocessReport, w: &mut W) -> io::Result<()> {
    writeln!(w, "Preprocessed {} cases:", r.cases.len())?;
    for split in [Split::Train, Split::Val] {
        let (slices, positive) = r.totals(split);
        let cases = r.cases.iter().filter(|c| c.split == split).count();
        writeln!(
            w,
            "{S4}{split}: {cases} cases, {slices} slices, {positive} with tumor"
        )?;
    }
    Ok(())
}

/// 将训练结果写进 `w` 中.
pub fn describe_fit<W: Write>(r: &FitReport, w: &mut W) -> io::Result<()> {
    writeln!(w, "Trained {} epochs, {} steps:", r.epochs.len(), r.global_step)?;
    for e in r.epochs.iter() {
        let saved = if e.checkpoint.is_some() { " *" } else { "" };
        writeln!(
            w,
            "{S4}epoch {:>3}: train loss {:.5} dice {:.4} | val loss {:.5} dice {:.4}{saved}",
            e.epoch, e.train_loss, e.train_dice, e.val_loss, e.val_dice
        )?;
    }
    match &r.best {
        Some(best) => write!(
            w,
            "Best checkpoint: {} (val loss {:.5})",
            best.path.display(),
            best.val_loss.into_inner()
        ),
        None => write!(w, "No checkpoint saved"),
    }
}

/// 将评估结果写进 `w` 中.
pub fn describe_eval<W: Write>(r: &EvalReport, w: &mut W) -> io::Result<()> {
    writeln!(w, "Evaluation:")?;
    writeln!(w, "{S4}Samples: {}", r.samples)?;
    writeln!(w, "{S4}Samples with tumor: {}", r.positive_samples)?;
    write!(w, "{S4}Dice: {:.6}", r.dice)
}

/// 输出到标准输出, 前后加分隔线.
pub fn print_with<F>(describe: F) -> io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let mut buf = Vec::with_capacity(512);
    describe(&mut buf)?;
    utils::sep();
    println!("{}", String::from_utf8_lossy(&buf));
    utils::sep();
    Ok(())
}
