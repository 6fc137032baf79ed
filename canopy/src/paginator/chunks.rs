//! Chunk files: writing them, counting them, and putting them together.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, WriterBuilder};

use crate::{
    error::Error,
    graph::{field_text, ResultSet},
};

/// Suffix of the directory holding the chunks of a table.
pub const CHUNKS_SUFFIX: &str = ".chunks";

/// Suffix of files that are being written and not yet in place.
const TEMP_SUFFIX: &str = ".new";

/// Directory holding the chunks of the table at `table_path`.
pub fn chunks_dir(table_path: &Path) -> PathBuf {
    with_suffix(table_path, CHUNKS_SUFFIX)
}

/// File name of the chunk starting at row `skip`.
pub fn chunk_name(skip: u64, chunk_size: Option<u64>) -> String {
    match chunk_size {
        Some(size) => format!("{skip}_{size}.csv"),
        None => format!("{skip}.csv"),
    }
}

/// Append `suffix` to the final component of `path`.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a finished temporary file into place.
pub(crate) fn commit(temp: &Path, path: &Path) -> Result<(), Error> {
    fs::rename(temp, path).map_err(|err| Error::writing(err, path))
}

/// Write `rows` under `header` to `path`.
///
/// The data goes to a temporary file first, which is then renamed,
/// so `path` either does not exist or is complete.
pub fn write_csv<I, R>(header: &[String], rows: I, path: &Path) -> Result<u64, Error>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::writing(err, parent))?;
    }

    let temp = with_suffix(path, TEMP_SUFFIX);
    let file = File::create(&temp).map_err(|err| Error::writing(err, &temp))?;
    let mut writer = WriterBuilder::new().flexible(true).from_writer(file);

    writer.write_record(header)?;
    let mut count = 0;
    for row in rows {
        writer.write_record(row)?;
        count += 1;
    }
    writer.flush().map_err(|err| Error::writing(err, &temp))?;
    drop(writer);

    commit(&temp, path)?;
    Ok(count)
}

/// Serialize a result set to a chunk file.
///
/// The header is `headings` if given, otherwise the result's own column names.
pub fn emit_csv(result: &ResultSet, headings: Option<&[String]>, path: &Path) -> Result<u64, Error> {
    let header = headings.unwrap_or(&result.columns);
    if !result.is_empty() {
        log::info!("writing {} csv records to {}", result.len(), path.display());
    }
    write_csv(
        header,
        result
            .rows
            .iter()
            .map(|row| row.iter().map(field_text).collect::<Vec<_>>()),
        path,
    )
}

/// Number of data rows in a chunk file; a zero-length file has none.
pub fn count_rows(path: &Path) -> Result<u64, Error> {
    if fs::metadata(path)?.len() == 0 {
        return Ok(0);
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut record = csv::ByteRecord::new();
    let mut count = 0;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

/// Concatenate `chunks` into `path`, keeping only the header of the first chunk.
///
/// Returns the number of data rows written.
pub fn concatenate(chunks: &[PathBuf], path: &Path) -> Result<u64, Error> {
    let temp = with_suffix(path, TEMP_SUFFIX);
    let file = File::create(&temp).map_err(|err| Error::writing(err, &temp))?;
    let mut writer = WriterBuilder::new().flexible(true).from_writer(file);

    let mut count = 0;
    let mut record = csv::ByteRecord::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let mut reader = ReaderBuilder::new().flexible(true).from_path(chunk)?;
        if index == 0 {
            writer.write_byte_record(reader.byte_headers()?)?;
        }
        while reader.read_byte_record(&mut record)? {
            writer.write_byte_record(&record)?;
            count += 1;
        }
    }
    writer.flush().map_err(|err| Error::writing(err, &temp))?;
    drop(writer);

    commit(&temp, path)?;
    Ok(count)
}

/// Remove `dir` if it exists and has no entries.
pub fn remove_if_empty(dir: &Path) -> Result<bool, Error> {
    if !dir.is_dir() || fs::read_dir(dir)?.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(dir)?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use std::fs::read_to_string;

    use assert_fs::TempDir;
    use quickcheck_macros::quickcheck;
    use serde_json::json;
    use test_log::test;

    use super::*;

    fn header() -> Vec<String> {
        vec!["page_id".to_string(), "name".to_string()]
    }

    #[test]
    fn naming() {
        assert_eq!(chunk_name(2000, Some(1000)), "2000_1000.csv");
        assert_eq!(chunk_name(0, None), "0.csv");
        assert_eq!(
            chunks_dir(Path::new("/w/inferences.csv")),
            PathBuf::from("/w/inferences.csv.chunks")
        );
    }

    #[test]
    fn emit_prefers_given_headings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("0_10.csv");
        let result = ResultSet::new(
            vec!["d.page_id".into(), "d.canonical".into()],
            vec![vec![json!(7), json!("Felis, catus")], vec![json!(8), json!(null)]],
        );

        assert_eq!(emit_csv(&result, Some(&header()), &path).unwrap(), 2);
        assert_eq!(
            read_to_string(&path).unwrap(),
            "page_id,name\n7,\"Felis, catus\"\n8,\n"
        );
        assert!(!with_suffix(&path, TEMP_SUFFIX).exists());

        emit_csv(&result, None, &path).unwrap();
        assert!(read_to_string(&path)
            .unwrap()
            .starts_with("d.page_id,d.canonical\n"));
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn empty_marker_has_no_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.csv");
        File::create(&path).unwrap();
        assert_eq!(count_rows(&path).unwrap(), 0);
    }

    #[test]
    fn removes_only_empty_directories() {
        let dir = TempDir::new().unwrap();
        let chunks = dir.path().join("t.csv.chunks");
        fs::create_dir(&chunks).unwrap();
        File::create(chunks.join("0.csv")).unwrap();
        assert!(!remove_if_empty(&chunks).unwrap());
        fs::remove_file(chunks.join("0.csv")).unwrap();
        assert!(remove_if_empty(&chunks).unwrap());
        assert!(!chunks.exists());
    }

    #[quickcheck]
    fn assembly_keeps_one_header(chunk_count: u8, rows_per_chunk: u8) -> bool {
        let chunk_count = (chunk_count % 6) as u64 + 1;
        let rows_per_chunk = (rows_per_chunk % 20) as u64;

        let dir = TempDir::new().unwrap();
        let chunks: Vec<PathBuf> = (0..chunk_count)
            .map(|chunk| {
                let path = dir.path().join(chunk_name(chunk * 20, Some(20)));
                let rows = (0..rows_per_chunk).map(|row| vec![format!("{chunk}"), format!("{row}")]);
                write_csv(&header(), rows, &path).unwrap();
                path
            })
            .collect();

        let output = dir.path().join("all.csv");
        let written = concatenate(&chunks, &output).unwrap();
        let text = read_to_string(&output).unwrap();

        written == chunk_count * rows_per_chunk
            && text.lines().count() as u64 == chunk_count * rows_per_chunk + 1
            && text.lines().filter(|line| *line == "page_id,name").count() == 1
    }
}
