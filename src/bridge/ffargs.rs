use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::meta::mime::mime_by_name;

/// A transcoder invocation as shipped from the subordinate to the server
/// and on to the browser. `inputs` and `outputs` index into `args`
/// (argv[0] included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfArgs {
    pub cwd: String,
    pub args: Vec<String>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FfArgsError {
    #[error("missing input file after -i")]
    MissingInputPath,
    #[error("no input files provided")]
    NoInputs,
}

/// Classify an argv: `-i <path>` tokens are inputs; the remaining non-flag
/// tokens whose extension maps to a known MIME type are outputs. Flags are
/// never files. `file:` URL prefixes are stripped when the paths are used,
/// not here, so indexes always refer to the original argv.
pub fn parse(args: &[String], cwd: &Path) -> Result<FfArgs, FfArgsError> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        if arg == "-i" {
            if i + 1 >= args.len() {
                return Err(FfArgsError::MissingInputPath);
            }
            inputs.push(i + 1);
            i += 2;
            continue;
        }
        if arg.starts_with('-') {
            i += 1;
            continue;
        }
        if mime_by_name(strip_file_scheme(arg)).is_some() {
            outputs.push(i);
        }
        i += 1;
    }

    if inputs.is_empty() {
        return Err(FfArgsError::NoInputs);
    }

    Ok(FfArgs {
        cwd: cwd.to_string_lossy().into_owned(),
        args: args.to_vec(),
        inputs,
        outputs,
    })
}

pub fn strip_file_scheme(token: &str) -> &str {
    token.strip_prefix("file:").unwrap_or(token)
}

impl FfArgs {
    /// Resolve an argv token to a filesystem path: strip a `file:` prefix
    /// and anchor relative paths at the subordinate's working directory.
    pub fn resolve(&self, index: usize) -> PathBuf {
        let token = strip_file_scheme(&self.args[index]);
        let path = Path::new(token);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.cwd).join(path)
        }
    }
}
