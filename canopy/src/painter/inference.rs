//! Reconciliation of asserted and retracted inferences.

use std::{
    fs,
    path::{Path, PathBuf},
};

use csv::ReaderBuilder;
use linked_hash_map::LinkedHashMap;

use crate::{
    error::Error,
    manifest,
    paginator::{chunk_name, chunks::write_csv, chunks_dir},
};

/// Columns of the inference tables.
pub const INFERENCE_COLUMNS: [&str; 5] = ["page_id", "name", "trait", "measurement", "object_name"];

/// Inferences are unique per page and trait (`eol_pk` of the trait).
pub type InferenceKey = (u64, String);

/// What is inferred about a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    /// Name of the page
    pub name: String,
    /// Measurement of the trait
    pub measurement: String,
    /// Name of the trait's object term
    pub object_name: String,
}

impl Inference {
    /// Create an inference.
    pub fn new(
        name: impl Into<String>,
        measurement: impl Into<String>,
        object_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            measurement: measurement.into(),
            object_name: object_name.into(),
        }
    }
}

/// The net set of inferences, in the order they were first asserted.
#[derive(Debug, Clone, Default)]
pub struct InferenceSet {
    entries: LinkedHashMap<InferenceKey, Inference>,
    duplicates: Vec<InferenceKey>,
}

impl InferenceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Add an inference unless its key is present already.
    ///
    /// The first assertion for a key wins; later ones are recorded as
    /// duplicates. Returns whether the inference was added.
    pub fn assert(&mut self, key: InferenceKey, inference: Inference) -> bool {
        if self.entries.contains_key(&key) {
            self.duplicates.push(key);
            false
        } else {
            self.entries.insert(key, inference);
            true
        }
    }

    /// Remove the inference for `key`, returning whether there was one.
    pub fn retract(&mut self, key: &InferenceKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// The inference for `key`.
    pub fn get(&self, key: &InferenceKey) -> Option<&Inference> {
        self.entries.get(key)
    }

    /// Keys asserted more than once, once per extra assertion.
    pub fn duplicates(&self) -> &[InferenceKey] {
        &self.duplicates
    }

    /// Number of inferences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no inferences.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All inferences in order.
    pub fn iter(&self) -> impl Iterator<Item = (&InferenceKey, &Inference)> {
        self.entries.iter()
    }

    /// Assert every row of a table of descendants
    /// (`page, trait, name, measurement, object_name`).
    ///
    /// Returns the number of rows read.
    pub fn read_assertions(&mut self, path: &Path) -> Result<u64, Error> {
        let mut rows = 0;
        for_each_row(path, |key, record| {
            let field = |index: usize| record.get(index).unwrap_or("").to_string();
            self.assert(key, Inference::new(field(2), field(3), field(4)));
            rows += 1;
        })?;

        log::info!("Found {} proper start-point descendants", self.len());
        if !self.duplicates.is_empty() {
            log::warn!(
                "Found {} duplicate start-point descendants",
                self.duplicates.len()
            );
            for (page_id, trait_pk) in &self.duplicates {
                log::warn!("Duplicate: {page_id},{trait_pk}");
            }
        }
        Ok(rows)
    }

    /// Retract every row of a table of descendants (`page, trait`).
    ///
    /// Returns the number of inferences actually removed.
    pub fn read_retractions(&mut self, path: &Path) -> Result<u64, Error> {
        let mut removed = 0;
        for_each_row(path, |key, _| {
            if self.retract(&key) {
                removed += 1;
            }
        })?;
        log::info!("Removed {removed} stop-point descendants");
        Ok(removed)
    }

    fn rows(&self) -> impl Iterator<Item = [String; 5]> + '_ {
        self.entries.iter().map(|((page_id, trait_pk), inference)| {
            [
                page_id.to_string(),
                inference.name.clone(),
                trait_pk.clone(),
                inference.measurement.clone(),
                inference.object_name.clone(),
            ]
        })
    }

    /// Write all inferences to a single CSV file.
    pub fn write_csv(&self, path: &Path) -> Result<u64, Error> {
        log::info!("Writing {} inferences to {}", self.len(), path.display());
        write_csv(&header(), self.rows(), path)
    }

    /// Write the inferences as chunk files of `page_size` rows next to
    /// `net_path`, together with their manifest.
    ///
    /// There is always at least one chunk, so that an empty set still
    /// yields a loadable (header only) file. Returns the chunk paths.
    pub fn explode(&self, net_path: &Path, page_size: u64) -> Result<Vec<PathBuf>, Error> {
        let page_size = page_size.max(1);
        let dir = chunks_dir(net_path);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir).map_err(|err| Error::writing(err, &dir))?;

        let total = self.len() as u64;
        let number_of_chunks = total.div_ceil(page_size).max(1);
        let mut rows = self.rows();
        let mut paths = Vec::new();
        for chunk in 0..number_of_chunks {
            let path = dir.join(chunk_name(chunk * page_size, Some(page_size)));
            log::info!("Writing {}", path.display());
            write_csv(&header(), rows.by_ref().take(page_size as usize), &path)?;
            paths.push(path);
        }

        manifest::write_manifest(&dir)?;
        Ok(paths)
    }
}

fn header() -> Vec<String> {
    INFERENCE_COLUMNS.iter().map(|column| column.to_string()).collect()
}

/// Call `f` with the key and record of each data row; the header is skipped.
fn for_each_row(
    path: &Path,
    mut f: impl FnMut(InferenceKey, &csv::StringRecord),
) -> Result<(), Error> {
    if fs::metadata(path)?.len() == 0 {
        return Ok(());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    for record in reader.records() {
        let record = record?;
        let page = record.get(0).unwrap_or("");
        let page_id = page.parse().map_err(|_| Error::MalformedRow {
            filename: path.to_path_buf(),
            message: format!("page id {page:?} at line {}", line_of(&record)),
        })?;
        let trait_pk = record.get(1).unwrap_or("").to_string();
        f((page_id, trait_pk), &record);
    }
    Ok(())
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|position| position.line()).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use std::fs::read_to_string;

    use assert_fs::{prelude::*, TempDir};
    use test_log::test;

    use super::*;

    fn key(page_id: u64, trait_pk: &str) -> InferenceKey {
        (page_id, trait_pk.to_string())
    }

    #[test]
    fn retraction_leaves_net_set() {
        let mut set = InferenceSet::new();
        set.assert(key(1, "A"), Inference::new("n", "v", "o"));
        set.assert(key(2, "A"), Inference::new("n2", "v2", "o2"));

        assert!(set.retract(&key(2, "A")));
        assert!(!set.retract(&key(3, "A")));

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&key(1, "A")), Some(&Inference::new("n", "v", "o")));
        assert_eq!(set.get(&key(2, "A")), None);
    }

    #[test]
    fn first_assertion_wins() {
        let mut set = InferenceSet::new();
        assert!(set.assert(key(1, "A"), Inference::new("first", "", "")));
        assert!(!set.assert(key(1, "A"), Inference::new("second", "", "")));

        assert_eq!(set.get(&key(1, "A")).map(|i| i.name.as_str()), Some("first"));
        assert_eq!(set.duplicates(), &[key(1, "A")]);
    }

    #[test]
    fn tables() {
        let dir = TempDir::new().unwrap();
        let assert_file = dir.child("assert.csv");
        assert_file
            .write_str(
                "page,trait,d.canonical,t.measurement,o.name\n\
                 1,A,Felis,,carnivore\n\
                 2,A,\"Panthera, big\",,carnivore\n\
                 1,A,Felis again,,herbivore\n",
            )
            .unwrap();
        let retract_file = dir.child("retract.csv");
        retract_file
            .write_str("page,trait\n2,A\n2,A\n9,B\n")
            .unwrap();

        let mut set = InferenceSet::new();
        assert_eq!(set.read_assertions(assert_file.path()).unwrap(), 3);
        assert_eq!(set.read_retractions(retract_file.path()).unwrap(), 1);

        let net = dir.path().join("inferences.csv");
        assert_eq!(set.write_csv(&net).unwrap(), 1);
        assert_eq!(
            read_to_string(&net).unwrap(),
            "page_id,name,trait,measurement,object_name\n1,Felis,A,,carnivore\n"
        );
    }

    #[test]
    fn malformed_page() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("assert.csv");
        file.write_str("page,trait\nx,A\n").unwrap();
        assert!(matches!(
            InferenceSet::new().read_assertions(file.path()),
            Err(Error::MalformedRow { .. })
        ));
    }

    #[test]
    fn explosion() {
        let dir = TempDir::new().unwrap();
        let net = dir.path().join("inferences.csv");

        let mut set = InferenceSet::new();
        for page in 0..25 {
            set.assert(key(page, "A"), Inference::default());
        }

        // Stale chunks from an earlier run disappear
        dir.child("inferences.csv.chunks/90_10.csv")
            .write_str("page_id\n")
            .unwrap();

        let paths = set.explode(&net, 10).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["0_10.csv", "10_10.csv", "20_10.csv"]);

        let lines: Vec<_> = paths
            .iter()
            .map(|path| read_to_string(path).unwrap().lines().count())
            .collect();
        assert_eq!(lines, vec![11, 11, 6]);

        let listed = manifest::read_manifest(&chunks_dir(&net).join(manifest::MANIFEST_NAME)).unwrap();
        assert_eq!(listed, names);
    }

    #[test]
    fn empty_set_explodes_into_one_chunk() {
        let dir = TempDir::new().unwrap();
        let net = dir.path().join("inferences.csv");
        let paths = InferenceSet::new().explode(&net, 10).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(
            read_to_string(&paths[0]).unwrap(),
            "page_id,name,trait,measurement,object_name\n"
        );
    }
}
