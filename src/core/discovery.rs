use crate::types::{RasterError, RasterResult};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};

/// Raster extensions picked up by directory reprojection
pub const DEFAULT_INPUT_EXTENSIONS: &[&str] = &[".tif", ".tiff", ".img", ".dat", ".hdf"];

fn ensure_directory(dir: &Path) -> RasterResult<()> {
    if !dir.exists() {
        return Err(RasterError::Discovery(format!(
            "input directory {} does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(RasterError::Discovery(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}

/// Files directly in `dir` whose name ends with one of `extensions`,
/// case-insensitively, sorted by path
pub fn discover_by_extension(dir: &Path, extensions: &[String]) -> RasterResult<Vec<PathBuf>> {
    ensure_directory(dir)?;

    let suffixes: Vec<String> = extensions
        .iter()
        .map(|ext| {
            let ext = ext.trim().to_ascii_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect();

    let entries = fs::read_dir(dir)
        .map_err(|e| RasterError::Discovery(format!("cannot list {}: {}", dir.display(), e)))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| RasterError::Discovery(format!("cannot list {}: {}", dir.display(), e)))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            found.push(path);
        }
    }

    found.sort();
    log::info!("Found {} input rasters in {}", found.len(), dir.display());
    Ok(found)
}

/// Files in `dir` matching a glob `pattern` (e.g. `*.hdf`), case-insensitively,
/// sorted by path
pub fn discover_by_pattern(dir: &Path, pattern: &str) -> RasterResult<Vec<PathBuf>> {
    ensure_directory(dir)?;

    let escaped = Pattern::escape(&dir.to_string_lossy());
    let full = Path::new(&escaped).join(pattern);
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let paths = glob::glob_with(&full.to_string_lossy(), options)
        .map_err(|e| RasterError::Discovery(format!("invalid pattern '{}': {}", pattern, e)))?;

    let mut found = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => found.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable entry: {}", e),
        }
    }

    found.sort();
    log::info!(
        "Found {} files matching '{}' in {}",
        found.len(),
        pattern,
        dir.display()
    );
    Ok(found)
}

pub(crate) fn default_extensions() -> Vec<String> {
    DEFAULT_INPUT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_extension_filter_is_case_insensitive_and_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b.TIF", "a.tif", "c.img", "notes.txt", "d.tif.aux.xml"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("sub.tif")).unwrap();

        let found = discover_by_extension(dir.path(), &default_extensions()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tif", "b.TIF", "c.img"]);
    }

    #[test]
    fn test_extension_without_dot() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "x.dat");
        let found = discover_by_extension(dir.path(), &["dat".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_pattern_discovery() {
        let dir = tempdir().unwrap();
        for name in ["m2.hdf", "m1.HDF", "m.nc"] {
            touch(dir.path(), name);
        }
        let found = discover_by_pattern(dir.path(), "*.hdf").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("m1.HDF"));
    }

    #[test]
    fn test_missing_directory_is_discovery_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = discover_by_extension(&missing, &default_extensions()).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::Discovery);
        assert!(discover_by_pattern(&missing, "*.hdf").is_err());
    }
}
