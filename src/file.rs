use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ChapterError, Result};

/// `<dir>/<prefix><file name>` next to the input.
pub fn derive_output_path(input: &Path, prefix: &str) -> Result<PathBuf> {
    let file_name = input.file_name().ok_or_else(|| {
        ChapterError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid input file name: {}", input.display()),
        ))
    })?;

    let mut name = prefix.to_owned();
    name.push_str(&file_name.to_string_lossy());

    Ok(match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Picks the remux target: the explicit path if given, else the derived one.
/// The source container is never overwritten.
pub fn resolve_output_path(input: &Path, output: Option<&Path>, prefix: &str) -> Result<PathBuf> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => derive_output_path(input, prefix)?,
    };

    if same_file(input, &output) {
        return Err(ChapterError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output would overwrite the input file {}", input.display()),
        )));
    }

    Ok(output)
}
