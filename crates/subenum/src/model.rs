use crate::{Error, Result};
use serde::Serialize;
use serde_json::to_string_pretty;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

// region:        --- Models

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedHost {
    pub name: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Text,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => OutputFormat::Json,
            Some("csv") => OutputFormat::Csv,
            _ => OutputFormat::Text,
        }
    }
}

// endregion:     --- Models

// region:        --- Exporting utils

pub fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        Ok(false)
    } else {
        fs::create_dir_all(dir)?;
        Ok(true)
    }
}

/// Resolves `path` against the working directory and refuses anything outside of it.
pub fn safe_path(path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let joined = cwd.join(path);
    let parent = joined.parent().unwrap_or(&cwd);
    let file_name = joined
        .file_name()
        .ok_or_else(|| Error::UnsafeOutputPath(path.display().to_string()))?;

    let resolved = parent.canonicalize()?.join(file_name);
    if resolved.starts_with(cwd.canonicalize()?) {
        Ok(resolved)
    } else {
        Err(Error::UnsafeOutputPath(path.display().to_string()))
    }
}

pub fn export(result: &[ResolvedHost], path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => export_to_json(result, path),
        OutputFormat::Csv => export_to_csv(result, path),
        OutputFormat::Text => export_to_text(result, path),
    }
}

pub fn export_to_json(result: &[ResolvedHost], path: &Path) -> Result<()> {
    let json = to_string_pretty(result)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

pub fn export_to_csv(result: &[ResolvedHost], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["name", "ips"])?;
    for host in result {
        writer.write_record([host.name.as_str(), host.ips.join(",").as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_to_text(result: &[ResolvedHost], path: &Path) -> Result<()> {
    let names: Vec<&str> = result.iter().map(|host| host.name.as_str()).collect();
    let mut file = File::create(path)?;
    file.write_all(names.join("\n").as_bytes())?;
    Ok(())
}

// endregion:     --- Exporting utils
