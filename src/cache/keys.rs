//! Cache key generation

use crate::cache::CacheError;
use crate::core::{
    job::{CacheSpec, JobTemplate},
    matrix::MatrixCell,
    value::Value,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bumped whenever the hashed layout changes
const KEY_VERSION: &str = "v2";

/// Deterministic fingerprint of a job instance's declared inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey(s.to_string())
    }
}

/// Resolves cache keys relative to a project root
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    root: PathBuf,
}

impl CacheKeyResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Key for one instance of a job with a cache declaration
    ///
    /// The digest covers the key version, the job id, the salt, the job
    /// definition (step commands and guards, env in key order), the matrix
    /// cell in key order and every input file (path and content) in path
    /// order. Directories are walked recursively; symlinked directories
    /// below an input are not followed.
    pub fn resolve(
        &self,
        template: &JobTemplate,
        spec: &CacheSpec,
        cell: &MatrixCell,
    ) -> Result<CacheKey, CacheError> {
        let job = template.id.as_str();
        let mut hasher = Sha256::new();
        field(&mut hasher, KEY_VERSION);
        field(&mut hasher, job);
        field(&mut hasher, &spec.key);

        for step in &template.steps {
            field(&mut hasher, "step");
            field(&mut hasher, &step.run);
            field(
                &mut hasher,
                step.condition.as_ref().map_or("", |c| c.source()),
            );
        }

        for (name, value) in &template.env {
            field(&mut hasher, "env");
            field(&mut hasher, name);
            field(&mut hasher, value);
        }

        let mut entries: Vec<&(String, Value)> = cell.entries().iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in entries {
            field(&mut hasher, "matrix");
            field(&mut hasher, name);
            field(&mut hasher, type_tag(value));
            field(&mut hasher, &value.to_string());
        }

        let mut files = Vec::new();
        for input in &spec.inputs {
            let path = self.root.join(input);
            if !path.exists() {
                return Err(CacheError::MissingInput(path));
            }
            collect_files(&path, true, &mut files)?;
        }
        files.sort();
        files.dedup();

        for file in &files {
            let contents = std::fs::read(file).map_err(|source| CacheError::Io {
                path: file.clone(),
                source,
            })?;
            let relative = file.strip_prefix(&self.root).unwrap_or(file.as_path());
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(&contents);
        }

        let hash = hasher.finalize();
        Ok(CacheKey(format!(
            "{}-{}-{}",
            sanitize_key(&spec.key),
            sanitize_key(job),
            hex::encode(&hash[..16])
        )))
    }
}

/// Length-prefixed so adjacent fields can't run together
fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Integer(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "str",
    }
}

fn collect_files(path: &Path, top: bool, out: &mut Vec<PathBuf>) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    let linked = std::fs::symlink_metadata(path)
        .map_err(io_err)?
        .file_type()
        .is_symlink();

    if path.is_dir() {
        if linked && !top {
            debug!("Not following symlinked directory {}", path.display());
            return Ok(());
        }
        for entry in std::fs::read_dir(path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            collect_files(&entry.path(), false, out)?;
        }
    } else {
        out.push(path.to_path_buf());
    }
    Ok(())
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}
