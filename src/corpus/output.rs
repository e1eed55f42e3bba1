//! Prediction artifacts: dot-bracket, BPSEQ and sparse posterior files.
//!
//! A destination is either a single file (valid only when one example is
//! predicted) or a directory receiving one file per example named after the
//! example's basename. When several decoding gains are swept, a directory
//! destination gains a per-gain subdirectory.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::corpus::{
    errors::{CorpusError, CorpusResult},
    example::Example,
    structure::Structure,
};

/// Pair posteriors below this value are omitted from posterior files.
pub const POSTERIOR_CUTOFF: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDestination {
    File(PathBuf),
    Directory(PathBuf),
}

/// Which artifacts a prediction writes, and where.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictOutputs {
    pub parens: Option<OutputDestination>,
    pub bpseq: Option<OutputDestination>,
    pub posteriors: Option<OutputDestination>,
    /// Nest directory outputs under a subdirectory named after the gain.
    pub gain_subdirectory: bool,
}

impl PredictOutputs {
    /// Reject single-file destinations when more than one example is predicted.
    ///
    /// # Errors
    /// [`CorpusError::SingleFileDestination`].
    pub fn check_unit_count(&self, units: usize) -> CorpusResult<()> {
        let single = [&self.parens, &self.bpseq, &self.posteriors]
            .into_iter()
            .any(|d| matches!(d, Some(OutputDestination::File(_))));
        if single && units > 1 {
            return Err(CorpusError::SingleFileDestination { requested: units });
        }
        Ok(())
    }

    /// Write every configured artifact for one example.
    ///
    /// # Errors
    /// [`CorpusError::Io`] on any filesystem failure.
    pub fn write_all(
        &self, example: &Example, predicted: &Structure, posteriors: Option<&Array2<f64>>,
        gain: Option<f64>,
    ) -> CorpusResult<()> {
        let gain = if self.gain_subdirectory { gain } else { None };
        if let Some(dest) = &self.parens {
            write_text(&output_path(dest, example.name(), gain), &render_parens(example, predicted))?;
        }
        if let Some(dest) = &self.bpseq {
            write_text(&output_path(dest, example.name(), gain), &render_bpseq(example, predicted))?;
        }
        if let (Some(dest), Some(p)) = (&self.posteriors, posteriors) {
            write_text(&output_path(dest, example.name(), gain), &render_posteriors(example, p))?;
        }
        Ok(())
    }
}

/// Resolve the file an example's artifact is written to.
///
/// `File(p)` is used as is. `Directory(d)` yields `d/[gain/]basename`, where
/// `basename` is the final path component of the example name.
pub fn output_path(dest: &OutputDestination, example_name: &str, gain: Option<f64>) -> PathBuf {
    match dest {
        OutputDestination::File(path) => path.clone(),
        OutputDestination::Directory(dir) => {
            let basename = Path::new(example_name)
                .file_name()
                .map(|s| s.to_os_string())
                .unwrap_or_else(|| example_name.into());
            let mut path = dir.clone();
            if let Some(g) = gain {
                path.push(format!("{g}"));
            }
            path.push(basename);
            path
        }
    }
}

pub fn render_parens(example: &Example, predicted: &Structure) -> String {
    format!(">{}\n{}\n{}\n", example.name(), example.sequence(), predicted.to_dot_bracket())
}

/// BPSEQ: one `i base partner` line per position, 1-based, `0` when unpaired.
pub fn render_bpseq(example: &Example, predicted: &Structure) -> String {
    let mut out = String::new();
    for (i, base) in example.sequence().chars().enumerate() {
        let partner = predicted.partner(i).map_or(0, |j| j + 1);
        out.push_str(&format!("{} {} {}\n", i + 1, base, partner));
    }
    out
}

/// Sparse posterior matrix: `i base j:p ...` for `j > i` with `p ≥ POSTERIOR_CUTOFF`.
pub fn render_posteriors(example: &Example, posteriors: &Array2<f64>) -> String {
    let mut out = String::new();
    for (i, base) in example.sequence().chars().enumerate() {
        out.push_str(&format!("{} {}", i + 1, base));
        for j in (i + 1)..posteriors.ncols() {
            let p = posteriors[[i, j]];
            if p >= POSTERIOR_CUTOFF {
                out.push_str(&format!(" {}:{:.6}", j + 1, p));
            }
        }
        out.push('\n');
    }
    out
}

fn write_text(path: &Path, text: &str) -> CorpusResult<()> {
    let io_err = |e: std::io::Error| CorpusError::Io {
        path: path.display().to_string(),
        text: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let mut file = fs::File::create(path).map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover path resolution and the three text renderings.
    // Filesystem writes are exercised by the prediction integration test.
    // -------------------------------------------------------------------------

    fn hairpin() -> (Example, Structure) {
        let s = Structure::from_dot_bracket("(...)").expect("valid");
        let ex = Example::supervised("data/hp1.seq", "GAAAC", s.clone()).expect("valid");
        (ex, s)
    }

    #[test]
    // Purpose
    // -------
    // Directory destinations use the example basename and optional gain folder.
    fn output_path_uses_basename_and_gain_subdirectory() {
        let dir = OutputDestination::Directory(PathBuf::from("out"));
        assert_eq!(output_path(&dir, "data/hp1.seq", None), PathBuf::from("out/hp1.seq"));
        assert_eq!(output_path(&dir, "data/hp1.seq", Some(4.0)), PathBuf::from("out/4/hp1.seq"));
        let file = OutputDestination::File(PathBuf::from("single.txt"));
        assert_eq!(output_path(&file, "anything", Some(1.0)), PathBuf::from("single.txt"));
    }

    #[test]
    // Purpose
    // -------
    // Check the parens and BPSEQ renderings of a single hairpin.
    fn renderers_emit_expected_text() {
        // Arrange
        let (ex, s) = hairpin();

        // Act
        let parens = render_parens(&ex, &s);
        let bpseq = render_bpseq(&ex, &s);

        // Assert
        assert_eq!(parens, ">data/hp1.seq\nGAAAC\n(...)\n");
        assert_eq!(bpseq, "1 G 5\n2 A 0\n3 A 0\n4 A 0\n5 C 1\n");
    }

    #[test]
    // Purpose
    // -------
    // Posterior rendering drops entries below the cutoff.
    fn render_posteriors_drops_small_entries() {
        // Arrange
        let (ex, _) = hairpin();
        let mut p = Array2::zeros((5, 5));
        p[[0, 4]] = 0.75;
        p[[4, 0]] = 0.75;
        p[[1, 4]] = 1e-5;

        // Act
        let text = render_posteriors(&ex, &p);

        // Assert
        assert_eq!(text.lines().next(), Some("1 G 5:0.750000"));
        assert_eq!(text.lines().nth(1), Some("2 A"));
    }

    #[test]
    // Purpose
    // -------
    // A single-file destination only accepts one example.
    fn check_unit_count_rejects_many_examples_for_single_file() {
        let outputs = PredictOutputs {
            parens: Some(OutputDestination::File(PathBuf::from("x"))),
            ..PredictOutputs::default()
        };
        assert!(outputs.check_unit_count(1).is_ok());
        assert!(outputs.check_unit_count(2).is_err());
    }
}
