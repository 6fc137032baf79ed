//! Execution of long-running queries as a sequence of bounded sub-queries.
//!
//! A query whose result is too large to fetch at once, or that would hit the
//! server's execution time limit, is replaced by the same query with
//! `SKIP`/`LIMIT` appended. Each sub-query yields a chunk file; the chunks are
//! then assembled into a single CSV file.
//!
//! Every chunk that was fetched is kept on disk until assembly, so a run that
//! was interrupted can be repeated and will only fetch the missing chunks.
//! Chunk contents are reused without verification. This relies on the
//! database not changing while a table is being fetched.

pub mod chunks;

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use crate::{error::Error, graph::QueryClient};

pub use chunks::{chunk_name, chunks_dir, emit_csv, CHUNKS_SUFFIX};

/// `LIMIT` used for a query that is not split into chunks.
pub const UNBOUNDED_LIMIT: u64 = 10_000_000;

/// Row count reported for a table that already existed.
pub const CACHED_ROWS: i64 = -2;

/// Row count reported for a table that could not be generated.
pub const FAILED_ROWS: i64 = -1;

/// A query to be run in chunks, together with where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedQuery {
    query: String,
    output: PathBuf,
    headings: Option<Vec<String>>,
    chunk_size: Option<u64>,
    skipping: bool,
    write_empty: bool,
}

impl ChunkedQuery {
    /// Run `query` and write its result to `output`.
    ///
    /// By default the query is run in a single call, the server's
    /// column names become the header, and an empty result still
    /// produces a file.
    pub fn new(query: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            output: output.into(),
            headings: None,
            chunk_size: None,
            skipping: true,
            write_empty: true,
        }
    }

    /// Use these column names instead of the ones returned by the server.
    pub fn headings(mut self, headings: Vec<String>) -> Self {
        self.headings = Some(headings);
        self
    }

    /// Fetch at most `chunk_size` rows per sub-query; `None` fetches everything at once.
    ///
    /// A chunk size of 0 could never advance, so it is treated like `None`.
    pub fn chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.chunk_size = chunk_size.filter(|size| *size > 0);
        self
    }

    /// Whether the query tolerates an appended `SKIP`.
    ///
    /// Without `SKIP` only a single sub-query can be issued.
    pub fn skipping(mut self, skipping: bool) -> Self {
        self.skipping = skipping;
        self
    }

    /// Whether an empty result should still produce a (header only) file.
    pub fn write_empty(mut self, write_empty: bool) -> Self {
        self.write_empty = write_empty;
        self
    }

    /// The query as given.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Where the assembled table is written.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Text of the sub-query starting at row `skip`.
    pub fn sub_query(&self, skip: u64) -> String {
        let limit = self.chunk_size.unwrap_or(UNBOUNDED_LIMIT);
        if self.skipping {
            format!("{} SKIP {skip} LIMIT {limit}", self.query)
        } else {
            format!("{} LIMIT {limit}", self.query)
        }
    }

    /// Checkpoint file for the sub-query starting at row `skip`.
    pub fn chunk_path(&self, skip: u64) -> PathBuf {
        chunks_dir(&self.output).join(chunk_name(skip, self.chunk_size))
    }
}

/// Result of supervising a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The output file existed already; nothing was done
    Cached(PathBuf),
    /// The output file was written
    Written {
        /// The table
        path: PathBuf,
        /// Number of data rows in it
        rows: u64,
    },
    /// The result was empty and no file was requested for that case
    NoFile,
    /// Something went wrong; the error has been logged
    Failed,
}

impl Outcome {
    /// Path of the table, if there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Cached(path) | Self::Written { path, .. } => Some(path),
            Self::NoFile | Self::Failed => None,
        }
    }

    /// Whether the table could not be generated.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// The outcome as a path and a row count, where the count is
    /// [CACHED_ROWS] or [FAILED_ROWS] in the respective cases.
    pub fn into_parts(self) -> (Option<PathBuf>, i64) {
        match self {
            Self::Cached(path) => (Some(path), CACHED_ROWS),
            Self::Written { path, rows } => (Some(path), i64::try_from(rows).unwrap_or(i64::MAX)),
            Self::NoFile => (None, 0),
            Self::Failed => (None, FAILED_ROWS),
        }
    }
}

/// Runs [ChunkedQuery]s through a [QueryClient].
///
/// The chunk directory and output file of a query belong to one
/// supervisor at a time; concurrent runs for the same output are not safe.
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
    client: &'a QueryClient,
}

impl<'a> Paginator<'a> {
    /// Create a paginator using `client` for all sub-queries.
    pub fn new(client: &'a QueryClient) -> Self {
        Self { client }
    }

    /// Run `query` in chunks of `chunk_size` rows and assemble the result at `output`.
    pub fn supervise_query(
        &self,
        query: &str,
        headings: Option<&[String]>,
        chunk_size: Option<u64>,
        output: &Path,
    ) -> Outcome {
        let mut chunked = ChunkedQuery::new(query, output).chunk_size(chunk_size);
        if let Some(headings) = headings {
            chunked = chunked.headings(headings.to_vec());
        }
        self.supervise(&chunked)
    }

    /// Generate the chunks for `query`, then put them together into a single CSV file.
    ///
    /// Failures are logged and reported as [Outcome::Failed],
    /// so that one failed table does not stop a job producing many.
    pub fn supervise(&self, query: &ChunkedQuery) -> Outcome {
        let output = query.output();
        if output.exists() {
            log::info!("Using previously generated file {}", output.display());
            return Outcome::Cached(output.to_path_buf());
        }

        let dir = chunks_dir(output);
        if fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_some()) {
            log::info!("There are cached results in {}", dir.display());
        }

        match self.fetch_and_assemble(query) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("Failed to generate {}", output.display());
                log_error_chain(&err);
                log::error!("Query: {:?}", query.query());
                Outcome::Failed
            }
        }
    }

    fn fetch_and_assemble(&self, query: &ChunkedQuery) -> Result<Outcome, Error> {
        let (chunks, count) = self.fetch_chunks(query)?;
        if count > 0 {
            log::info!(
                "{}: {} chunks, {count} records",
                file_name(query.output()),
                chunks.len()
            );
        }

        let outcome = assemble(query, &chunks)?;
        chunks::remove_if_empty(&chunks_dir(query.output()))?;
        Ok(outcome)
    }

    /// Ensure that all chunk files for a table exist, querying as needed.
    ///
    /// Returns the chunks holding data (in order) and the total number of rows.
    fn fetch_chunks(&self, query: &ChunkedQuery) -> Result<(Vec<PathBuf>, u64), Error> {
        let mut chunks = Vec::new();
        let mut skip = 0;
        let mut total = 0;

        loop {
            let chunk_path = query.chunk_path(skip);

            let got = if chunk_path.exists() {
                let rows = chunks::count_rows(&chunk_path)?;
                log::debug!("Reusing {} ({rows} rows)", chunk_path.display());
                if fs::metadata(&chunk_path)?.len() > 0 {
                    chunks.push(chunk_path);
                }
                rows
            } else {
                let sub_query = query.sub_query(skip);
                log::debug!("Sub-query: {sub_query}");
                let result = self.client.run_query(&sub_query)?;
                let got = result.len() as u64;

                // A table without rows still needs its header once
                if got > 0 || skip == 0 {
                    emit_csv(&result, query.headings.as_deref(), &chunk_path)?;
                    chunks.push(chunk_path);
                } else {
                    log::debug!("No more results at {skip}");
                    touch(&chunk_path)?;
                }
                got
            };
            total += got;

            match query.chunk_size {
                Some(size) if query.skipping && got >= size => skip += size,
                _ => break,
            }
        }

        Ok((chunks, total))
    }
}

/// Combine the chunks of a table into the single file at the query's output path.
fn assemble(query: &ChunkedQuery, chunks: &[PathBuf]) -> Result<Outcome, Error> {
    let output = query.output();
    match chunks {
        [] => {
            if !query.write_empty {
                return Ok(Outcome::NoFile);
            }
            let header = query.headings.clone().unwrap_or_default();
            if header.is_empty() {
                touch(output)?;
            } else {
                chunks::write_csv(&header, std::iter::empty::<Vec<String>>(), output)?;
            }
            Ok(Outcome::Written {
                path: output.to_path_buf(),
                rows: 0,
            })
        }
        [single] => {
            let rows = chunks::count_rows(single)?;
            if rows == 0 && !query.write_empty {
                fs::remove_file(single)?;
                return Ok(Outcome::NoFile);
            }
            chunks::commit(single, output)?;
            Ok(Outcome::Written {
                path: output.to_path_buf(),
                rows,
            })
        }
        many => {
            let rows = chunks::concatenate(many, output)?;
            // The chunks stay around for diagnostics
            Ok(Outcome::Written {
                path: output.to_path_buf(),
                rows,
            })
        }
    }
}

fn touch(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::writing(err, parent))?;
    }
    File::create(path).map_err(|err| Error::writing(err, path))?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Log an error together with everything that caused it.
pub(crate) fn log_error_chain(err: &dyn std::error::Error) {
    log::error!("Exception: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        log::error!("  caused by: {cause}");
        source = cause.source();
    }
}
