//! Manifests list the chunk files of a table.
//!
//! A consumer that can only fetch files by URL (for instance a bulk load
//! running on the database server) reads the manifest first to learn
//! which chunks exist.

use std::{
    fs,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{error::Error, paginator::CHUNKS_SUFFIX};

/// File name of the manifest inside a chunk directory.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Names of the CSV files directly inside `chunks_dir`, sorted.
pub fn chunk_names(chunks_dir: &Path) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    for entry in fs::read_dir(chunks_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".csv") {
            names.push(name);
        }
    }
    names.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
    Ok(names)
}

/// Orders `10000_10000.csv` after `9000_10000.csv`.
fn natural_key(name: &str) -> (u64, &str) {
    let offset = name
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u64::MAX);
    (offset, name)
}

/// Write the manifest of `chunks_dir`, returning its path.
pub fn write_manifest(chunks_dir: &Path) -> Result<PathBuf, Error> {
    let names = chunk_names(chunks_dir)?;
    let path = chunks_dir.join(MANIFEST_NAME);
    log::info!("Writing {} ({} chunks)", path.display(), names.len());
    fs::write(&path, serde_json::to_string(&names)?).map_err(|err| Error::writing(err, &path))?;
    Ok(path)
}

/// Read the chunk names listed in a manifest.
pub fn read_manifest(path: &Path) -> Result<Vec<String>, Error> {
    parse_manifest(&fs::read_to_string(path)?)
}

/// Interpret the text of a manifest.
pub fn parse_manifest(text: &str) -> Result<Vec<String>, Error> {
    Ok(serde_json::from_str(text)?)
}

/// URLs of the chunks listed in a manifest, relative to the chunk directory's URL.
pub fn chunk_urls(base_url: &str, names: &[String]) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    names.iter().map(|name| format!("{base}/{name}")).collect()
}

/// Write a manifest into every chunk directory below `root`.
///
/// Returns the paths of the manifests, in walking order.
pub fn write_manifests(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut written = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() && is_chunks_dir(entry.path()) {
            written.push(write_manifest(entry.path())?);
        }
    }
    Ok(written)
}

fn is_chunks_dir(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(CHUNKS_SUFFIX))
}

#[cfg(test)]
mod test {
    use assert_fs::{prelude::*, TempDir};
    use test_log::test;

    use super::*;

    #[test]
    fn manifests_for_every_chunk_directory() {
        let dir = TempDir::new().unwrap();
        dir.child("inferences/inferences.csv.chunks/0_10000.csv")
            .write_str("page_id\n")
            .unwrap();
        dir.child("inferences/inferences.csv.chunks/10000_10000.csv")
            .write_str("page_id\n")
            .unwrap();
        dir.child("inferences/inferences.csv.chunks/9000_10000.csv")
            .write_str("page_id\n")
            .unwrap();
        dir.child("inferences/inferences.csv.chunks/notes.txt")
            .write_str("-")
            .unwrap();
        dir.child("vernaculars/vernaculars.csv.chunks/0.csv")
            .write_str("page_id\n")
            .unwrap();
        dir.child("vernaculars/other/readme.csv").write_str("x\n").unwrap();

        let written = write_manifests(dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let names =
            read_manifest(&dir.path().join("inferences/inferences.csv.chunks/manifest.json")).unwrap();
        assert_eq!(names, vec!["0_10000.csv", "9000_10000.csv", "10000_10000.csv"]);
        assert!(!dir.path().join("vernaculars/other/manifest.json").exists());
    }

    #[test]
    fn urls_from_manifest() {
        let names = parse_manifest(r#"["0_2.csv","2_2.csv"]"#).unwrap();
        assert_eq!(
            chunk_urls("https://stage.example.org/640-inferences/inferences.csv.chunks/", &names),
            vec![
                "https://stage.example.org/640-inferences/inferences.csv.chunks/0_2.csv",
                "https://stage.example.org/640-inferences/inferences.csv.chunks/2_2.csv",
            ]
        );
    }
}
