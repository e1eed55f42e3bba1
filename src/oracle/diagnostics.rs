//! Diagnostic parameter dumps written before a precision failure is returned.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use ndarray::Array1;

use crate::corpus::{CorpusError, CorpusResult};

/// Path of the dump for `example_name` under `dir`: `dir/<basename>.params`.
pub fn params_dump_path(dir: &Path, example_name: &str) -> PathBuf {
    let basename = Path::new(example_name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| example_name.to_string());
    dir.join(format!("{basename}.params"))
}

/// Write one parameter per line in round-trippable scientific notation.
///
/// # Errors
/// [`CorpusError::Io`] if the directory or file cannot be written.
pub fn write_params_dump(
    dir: &Path, example_name: &str, params: &Array1<f64>,
) -> CorpusResult<PathBuf> {
    let path = params_dump_path(dir, example_name);
    let io_err = |e: std::io::Error| CorpusError::Io {
        path: path.display().to_string(),
        text: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut text = String::with_capacity(params.len() * 24);
    for p in params {
        text.push_str(&format!("{p:.17e}\n"));
    }
    let mut file = fs::File::create(&path).map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)?;
    Ok(path)
}
