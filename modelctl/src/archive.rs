use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;
use tar::Builder;

/// Canonical archive entry names. The inference container resolves the
/// weights and the code directory under these fixed names, whatever the
/// local files were called.
pub const WEIGHTS_ENTRY: &str = "current.pth";
pub const CODE_ENTRY: &str = "code";

/// Build the gzip tar archive the hosting runtime expects: exactly two
/// top-level entries, the weights file as `current.pth` and the full code
/// directory as `code/`.
pub fn build_model_archive(weights_file: &Path, code_dir: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create archive directory '{}'", parent.display())
            })?;
        }
    }

    let file = File::create(destination)
        .with_context(|| format!("Failed to create archive '{}'", destination.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    builder
        .append_path_with_name(weights_file, WEIGHTS_ENTRY)
        .with_context(|| format!("Failed to add weights file '{}'", weights_file.display()))?;
    builder
        .append_dir_all(CODE_ENTRY, code_dir)
        .with_context(|| format!("Failed to add code directory '{}'", code_dir.display()))?;

    let encoder = builder
        .into_inner()
        .context("Failed to finalize tar archive")?;
    encoder.finish().context("Failed to flush gzip stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::BTreeSet;
    use std::fs;
    use tar::Archive;
    use tempfile::TempDir;

    fn entry_paths(archive_path: &Path) -> Vec<String> {
        let file = File::open(archive_path).unwrap();
        let mut archive = Archive::new(GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn archive_has_exactly_the_two_canonical_top_level_entries() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("bart-2024-03.pth");
        fs::write(&weights, b"weights").unwrap();

        let code = dir.path().join("inference-src");
        fs::create_dir(&code).unwrap();
        fs::write(code.join("inference.py"), "def model_fn(d): ...\n").unwrap();
        fs::create_dir(code.join("utils")).unwrap();
        fs::write(code.join("utils").join("tokens.py"), "VOCAB = {}\n").unwrap();

        let destination = dir.path().join("out").join("model.tar.gz");
        build_model_archive(&weights, &code, &destination).unwrap();

        let top_level: BTreeSet<String> = entry_paths(&destination)
            .into_iter()
            .map(|p| p.split('/').next().unwrap().to_string())
            .collect();

        assert_eq!(
            top_level,
            BTreeSet::from(["current.pth".to_string(), "code".to_string()])
        );
    }

    #[test]
    fn weights_are_renamed_and_code_tree_is_preserved() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("some-other-name.bin");
        fs::write(&weights, b"weights").unwrap();

        let code = dir.path().join("src");
        fs::create_dir(&code).unwrap();
        fs::write(code.join("inference.py"), "...").unwrap();

        let destination = dir.path().join("model.tar.gz");
        build_model_archive(&weights, &code, &destination).unwrap();

        let entries = entry_paths(&destination);
        assert!(entries.contains(&"current.pth".to_string()));
        assert!(entries.contains(&"code/inference.py".to_string()));
        assert!(!entries.iter().any(|e| e.contains("some-other-name")));
    }

    #[test]
    fn missing_weights_file_fails() {
        let dir = TempDir::new().unwrap();
        let code = dir.path().join("src");
        fs::create_dir(&code).unwrap();

        let err = build_model_archive(
            &dir.path().join("gone.pth"),
            &code,
            &dir.path().join("model.tar.gz"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("gone.pth"));
    }
}
