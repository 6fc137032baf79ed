//! Branch painting: propagating traits down the taxonomic hierarchy.
//!
//! A trait of a resource can carry *start* directives, each naming a page
//! below which the trait is inferred for every descendant, and *stop*
//! directives, naming a page at and below which it is not. Inference
//! collects what the start directives imply, removes what the stop
//! directives exclude, and writes the net set as chunked CSV files that
//! the database can load by URL once they are staged.
//!
//! A page without a parent ends the propagation. A page whose parent is
//! merely unknown is not told apart from the root of the hierarchy;
//! [BranchPainter::qc] lists directive anchors without a parent so that
//! such cases can be checked by hand.

pub mod directive;
pub mod inference;
pub mod qc;
pub(crate) mod queries;

use std::path::{Path, PathBuf};

use crate::{
    config::Workspace,
    error::Error,
    graph::QueryClient,
    manifest,
    paginator::{ChunkedQuery, Outcome, Paginator},
    registry::Registry,
    staging::Stager,
};

pub use directive::{read_directives, Directive, DirectiveKind};
pub use inference::{Inference, InferenceKey, InferenceSet};
pub use qc::{QcFinding, QcReport};

/// Rows per sub-query and per exploded chunk.
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;

/// Name of the table holding the net inferences.
pub const INFERENCES_TABLE: &str = "inferences.csv";

/// A directive as stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveRow {
    /// `resource_pk` of the trait
    pub trait_pk: String,
    /// Start or stop
    pub kind: DirectiveKind,
    /// The anchor
    pub page_id: Option<u64>,
    /// Name of the anchor
    pub canonical: String,
    /// Parent of the anchor, if it has one
    pub parent_id: Option<u64>,
}

/// Sizes of the tables produced by [BranchPainter::infer].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceSummary {
    /// Rows in the table of start-point descendants
    pub asserted: u64,
    /// Keys asserted more than once
    pub duplicates: usize,
    /// Inferences removed because of stop directives
    pub retracted: u64,
    /// Size of the net set
    pub net: usize,
    /// The consolidated table
    pub path: PathBuf,
    /// The chunks of the consolidated table
    pub chunks: Vec<PathBuf>,
}

/// Outcome of loading directives from a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Directives that were added (or were present already)
    pub added: usize,
    /// Directives whose trait was not found
    pub failed: usize,
}

/// Runs the branch painting operations of a resource against the graph database.
#[derive(Debug)]
pub struct BranchPainter<'a> {
    client: &'a QueryClient,
    workspace: Workspace,
    starts_at: String,
    stops_at: String,
    page_size: u64,
}

impl<'a> BranchPainter<'a> {
    /// Create a painter.
    ///
    /// The directive predicates are taken from `registry`,
    /// which needs to know `starts_at` and `stops_at`.
    pub fn new(client: &'a QueryClient, workspace: Workspace, registry: &Registry) -> Result<Self, Error> {
        Ok(Self {
            client,
            workspace,
            starts_at: registry.named("starts_at")?.uri().to_string(),
            stops_at: registry.named("stops_at")?.uri().to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Use chunks of `page_size` rows.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn predicate(&self, kind: DirectiveKind) -> &str {
        match kind {
            DirectiveKind::Start => &self.starts_at,
            DirectiveKind::Stop => &self.stops_at,
        }
    }

    /// Directory holding the results of inference.
    pub fn inferences_dir(&self, resource: u64) -> PathBuf {
        self.workspace.resource_dir(resource, "inferences")
    }

    /// Directory holding the intermediate tables of inference.
    pub fn temp_dir(&self, resource: u64) -> PathBuf {
        self.workspace.resource_dir(resource, "inferences.tmp")
    }

    /// Name of the staged copy of [BranchPainter::inferences_dir].
    pub fn remote_name(resource: u64) -> String {
        format!("{resource}-inferences")
    }

    /// All start and stop directives of a resource.
    pub fn show_directives(&self, resource: u64) -> Result<Vec<DirectiveRow>, Error> {
        let mut rows = Vec::new();
        for kind in DirectiveKind::ALL {
            let query = queries::show_directives(resource, self.predicate(kind), &kind.to_string());
            let result = self.client.run_query(&query)?;
            rows.extend(result.rows.iter().map(|row| DirectiveRow {
                trait_pk: qc::text(row.first()),
                kind,
                page_id: row.get(2).and_then(qc::page_id),
                canonical: qc::text(row.get(3)),
                parent_id: row.get(4).and_then(qc::page_id),
            }));
        }
        Ok(rows)
    }

    /// Check the directives of a resource: every anchor should exist and
    /// have a parent, and every stop should be below a start of its trait.
    ///
    /// Only reads from the graph.
    pub fn qc(&self, resource: u64) -> Result<QcReport, Error> {
        let mut report = QcReport::default();

        for kind in DirectiveKind::ALL {
            let query = queries::qc_presence(resource, self.predicate(kind));
            for row in self.client.run_query(&query)?.rows {
                let Some(page_id) = row.first().and_then(qc::page_id) else {
                    continue;
                };
                let found = row.get(1).is_some_and(|value| !value.is_null());
                report.push(if found {
                    QcFinding::Parentless {
                        kind,
                        page_id,
                        canonical: qc::text(row.get(2)),
                    }
                } else {
                    QcFinding::MissingPoint { kind, page_id }
                });
            }
        }

        let query = queries::qc_stop_under_start(resource, &self.starts_at, &self.stops_at);
        for row in self.client.run_query(&query)?.rows {
            if let Some(page_id) = row.first().and_then(qc::page_id) {
                report.push(QcFinding::StopNotUnderStart {
                    page_id,
                    canonical: qc::text(row.get(1)),
                    trait_pk: qc::text(row.get(2)),
                });
            }
        }

        if report.is_clean() {
            log::info!("No problems found with the directives of resource {resource}");
        }
        Ok(report)
    }

    /// Compute the net inferences of a resource and write them to
    /// [INFERENCES_TABLE] in [BranchPainter::inferences_dir], once as a
    /// whole and once in chunks.
    ///
    /// Fails if the start-point descendants cannot be determined. A missing
    /// table of stop-point descendants means there is nothing to retract.
    pub fn infer(&self, resource: u64) -> Result<InferenceSummary, Error> {
        let paginator = Paginator::new(self.client);
        let temp = self.temp_dir(resource);

        let query = queries::assert_descendants(resource, &self.starts_at);
        log::debug!("{query}");
        let assert_path = match paginator.supervise(
            &ChunkedQuery::new(query, temp.join("assert.csv")).chunk_size(Some(self.page_size)),
        ) {
            Outcome::Cached(path) | Outcome::Written { path, .. } => path,
            Outcome::NoFile | Outcome::Failed => {
                return Err(Error::AssertPhaseFailed { resource });
            }
        };

        let query = queries::retract_descendants(resource, &self.stops_at);
        log::debug!("{query}");
        let retract = paginator.supervise(
            &ChunkedQuery::new(query, temp.join("retract.csv")).chunk_size(Some(self.page_size)),
        );

        let mut inferences = InferenceSet::new();
        let asserted = inferences.read_assertions(&assert_path)?;

        let retracted = match retract.path() {
            Some(path) => inferences.read_retractions(path)?,
            None => {
                if retract.is_failed() {
                    log::warn!("Stop-point descendants of resource {resource} could not be determined");
                }
                log::info!("No stop-point descendants to remove");
                0
            }
        };

        log::info!("Net: {} inferences", inferences.len());
        let path = self.inferences_dir(resource).join(INFERENCES_TABLE);
        inferences.write_csv(&path)?;
        let chunks = inferences.explode(&path, self.page_size)?;

        Ok(InferenceSummary {
            asserted,
            duplicates: inferences.duplicates().len(),
            retracted,
            net: inferences.len(),
            path,
            chunks,
        })
    }

    /// Write the manifests of the inference tables and copy them to the staging server.
    pub fn stage(&self, resource: u64, stager: &dyn Stager) -> Result<(), Error> {
        let dir = self.inferences_dir(resource);
        if !dir.is_dir() {
            return Err(Error::Staging(format!(
                "nothing to stage; run inference for resource {resource} first"
            )));
        }
        manifest::write_manifests(&dir)?;
        stager.stage(&dir, &Self::remote_name(resource))
    }

    /// Link pages to their inferred traits in the graph, one staged chunk at a time.
    ///
    /// Returns the number of relationships merged. Publishing again
    /// does not create duplicates.
    pub fn publish(&self, resource: u64, stager: &dyn Stager) -> Result<u64, Error> {
        let urls = stager.chunk_urls(&Self::remote_name(resource), INFERENCES_TABLE)?;
        let mut total = 0;
        for url in urls {
            let result = self.client.run_query(&queries::merge_chunk(&url))?;
            let count = result.first_count().unwrap_or(0);
            log::info!("Merged {count} relations from {url}");
            total += count;
        }
        Ok(total)
    }

    /// Number of inferred trait relationships of a resource in the graph.
    pub fn count(&self, resource: u64) -> Result<u64, Error> {
        let result = self.client.run_query(&queries::count_inferred(resource))?;
        Ok(result.first_count().unwrap_or(0))
    }

    /// Remove the inferred trait relationships of a resource from the graph.
    ///
    /// Returns the number removed.
    pub fn erase(&self, resource: u64) -> Result<u64, Error> {
        let result = self.client.run_query(&queries::erase_inferred(resource))?;
        let count = result.first_count().unwrap_or(0);
        log::info!("Erased {count} inferred trait relationships of resource {resource}");
        Ok(count)
    }

    /// Store a directive in the graph. Returns `false` if its trait was not found.
    pub fn add_directive(&self, resource: u64, directive: &Directive) -> Result<bool, Error> {
        let query = queries::add_directive(resource, directive, self.predicate(directive.kind));
        let result = self.client.run_query(&query)?;
        if result.is_empty() {
            log::warn!("Failed to add {directive}");
            Ok(false)
        } else {
            log::info!("Added {directive}");
            Ok(true)
        }
    }

    /// Store all directives of a tab-separated file in the graph.
    pub fn load_directives(&self, path: &Path, resource: u64) -> Result<LoadSummary, Error> {
        let mut summary = LoadSummary::default();
        for directive in read_directives(path)? {
            if self.add_directive(resource, &directive)? {
                summary.added += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, fs, rc::Rc};

    use assert_fs::TempDir;
    use serde_json::{json, Value};
    use test_log::test;

    use super::*;
    use crate::graph::{QueryError, QueryErrorKind, QueryPolicy, QueryTransport, ResultSet};

    /// Answers queries by the first rule whose patterns they all contain.
    #[derive(Debug, Default)]
    struct Scripted {
        rules: Vec<(Vec<String>, Result<ResultSet, QueryError>)>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Scripted {
        fn on(mut self, patterns: &[&str], columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
            let columns = columns.iter().map(|c| c.to_string()).collect();
            self.rules.push((
                patterns.iter().map(|p| p.to_string()).collect(),
                Ok(ResultSet::new(columns, rows)),
            ));
            self
        }

        fn failing(mut self, pattern: &str) -> Self {
            self.rules.push((
                vec![pattern.to_string()],
                Err(QueryError::new(QueryErrorKind::FatalBackend, "Neo.ClientError")),
            ));
            self
        }
    }

    impl QueryTransport for Scripted {
        fn execute(&self, query: &str) -> Result<ResultSet, QueryError> {
            self.log.borrow_mut().push(query.to_string());
            self.rules
                .iter()
                .find(|(patterns, _)| patterns.iter().all(|p| query.contains(p.as_str())))
                .map(|(_, answer)| answer.clone())
                .unwrap_or_else(|| Ok(ResultSet::default()))
        }
    }

    fn client(transport: Scripted) -> (QueryClient, Rc<RefCell<Vec<String>>>) {
        let log = transport.log.clone();
        let client = QueryClient::new(Box::new(transport), QueryPolicy::default()).with_pause(|_| {});
        (client, log)
    }

    fn painter<'a>(client: &'a QueryClient, dir: &TempDir) -> BranchPainter<'a> {
        BranchPainter::new(client, Workspace::new(dir.path()), &Registry::with_properties())
            .unwrap()
            .with_page_size(100)
    }

    const ASSERT_COLUMNS: &[&str] = &["page", "trait", "d.canonical", "t.measurement", "o.name"];

    #[test]
    fn net_inferences() {
        let dir = TempDir::new().unwrap();
        let (client, _) = client(
            Scripted::default()
                .on(
                    &["[:parent*1..]-(d:Page)"],
                    ASSERT_COLUMNS,
                    vec![
                        vec![json!(1), json!("A"), json!("n"), json!("v"), json!("o")],
                        vec![json!(2), json!("A"), json!("n2"), json!("v2"), json!("o2")],
                    ],
                )
                .on(
                    &["[:parent*0..]-(d:Page)"],
                    &["page", "trait"],
                    vec![vec![json!(2), json!("A")]],
                ),
        );

        let summary = painter(&client, &dir).infer(640).unwrap();

        assert_eq!(summary.asserted, 2);
        assert_eq!(summary.retracted, 1);
        assert_eq!(summary.net, 1);
        assert_eq!(
            fs::read_to_string(&summary.path).unwrap(),
            "page_id,name,trait,measurement,object_name\n1,n,A,v,o\n"
        );
        assert_eq!(
            summary.path,
            dir.path().join("resources/640/inferences/inferences.csv")
        );
        assert_eq!(summary.chunks.len(), 1);
        assert!(dir
            .path()
            .join("resources/640/inferences/inferences.csv.chunks/manifest.json")
            .exists());
    }

    #[test]
    fn duplicate_assertions_keep_first() {
        let dir = TempDir::new().unwrap();
        let (client, _) = client(Scripted::default().on(
            &["[:parent*1..]-(d:Page)"],
            ASSERT_COLUMNS,
            vec![
                vec![json!(1), json!("A"), json!("first"), json!(""), json!("")],
                vec![json!(1), json!("A"), json!("second"), json!(""), json!("")],
            ],
        ));

        let summary = painter(&client, &dir).infer(640).unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.net, 1);
        assert_eq!(summary.retracted, 0);
        let text = fs::read_to_string(&summary.path).unwrap();
        assert!(text.contains("1,first,A"));
        assert!(!text.contains("second"));
    }

    #[test]
    fn failed_assert_phase_stops_inference() {
        let dir = TempDir::new().unwrap();
        let (client, log) = client(Scripted::default().failing("[:parent*1..]-(d:Page)"));

        assert!(matches!(
            painter(&client, &dir).infer(640),
            Err(Error::AssertPhaseFailed { resource: 640 })
        ));
        // No retraction query after a failed assertion query
        assert_eq!(log.borrow().len(), 1);
        assert!(!dir.path().join("resources/640/inferences").exists());
    }

    #[test]
    fn failed_retract_phase_retracts_nothing() {
        let dir = TempDir::new().unwrap();
        let (client, _) = client(
            Scripted::default()
                .on(
                    &["[:parent*1..]-(d:Page)"],
                    ASSERT_COLUMNS,
                    vec![vec![json!(1), json!("A"), json!("n"), json!(""), json!("")]],
                )
                .failing("[:parent*0..]-(d:Page)"),
        );

        let summary = painter(&client, &dir).infer(640).unwrap();
        assert_eq!(summary.retracted, 0);
        assert_eq!(summary.net, 1);
    }

    fn qc_transport() -> Scripted {
        Scripted::default()
            .on(
                &["count(path) AS covering"],
                &["stop_id", "stop.canonical", "t.eol_pk"],
                vec![vec![json!(8), json!("Felis"), json!("R640-T1")]],
            )
            .on(
                &["stops_at", "WITH DISTINCT"],
                &["point_id", "point.page_id", "point.canonical"],
                vec![vec![json!(9), json!(null), json!(null)]],
            )
            .on(
                &["WITH DISTINCT"],
                &["point_id", "point.page_id", "point.canonical"],
                vec![vec![json!(1), json!(1), json!("Life")]],
            )
    }

    #[test]
    fn qc_is_read_only_and_repeatable() {
        let dir = TempDir::new().unwrap();
        let (client, log) = client(qc_transport());
        let painter = painter(&client, &dir);

        let first = painter.qc(640).unwrap();
        let second = painter.qc(640).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.findings(),
            &[
                QcFinding::Parentless {
                    kind: DirectiveKind::Start,
                    page_id: 1,
                    canonical: "Life".to_string()
                },
                QcFinding::MissingPoint {
                    kind: DirectiveKind::Stop,
                    page_id: 9
                },
                QcFinding::StopNotUnderStart {
                    page_id: 8,
                    canonical: "Felis".to_string(),
                    trait_pk: "R640-T1".to_string()
                },
            ]
        );
        assert_eq!(log.borrow().len(), 6);
        assert!(log.borrow().iter().all(|query| !queries::is_write(query)));
        assert!(!dir.path().join("resources").exists());
    }

    #[test]
    fn directives_are_listed() {
        let dir = TempDir::new().unwrap();
        let (client, _) = client(Scripted::default().on(
            &["WITH 'Start' AS tag"],
            &["t.resource_pk", "tag", "point_id", "point.canonical", "parent.page_id"],
            vec![vec![json!("T1"), json!("Start"), json!(5), json!("Felis"), json!(null)]],
        ));

        let rows = painter(&client, &dir).show_directives(640).unwrap();
        assert_eq!(
            rows,
            vec![DirectiveRow {
                trait_pk: "T1".to_string(),
                kind: DirectiveKind::Start,
                page_id: Some(5),
                canonical: "Felis".to_string(),
                parent_id: None,
            }]
        );
    }

    #[test]
    fn count_and_erase() {
        let dir = TempDir::new().unwrap();
        let (client, log) = client(
            Scripted::default()
                .on(&["DELETE r"], &["COUNT(*)"], vec![vec![json!(12)]])
                .on(&["RETURN COUNT(*)"], &["COUNT(*)"], vec![vec![json!(40)]]),
        );
        let painter = painter(&client, &dir);

        assert_eq!(painter.count(640).unwrap(), 40);
        assert_eq!(painter.erase(640).unwrap(), 12);
        assert!(log.borrow()[0].contains("{resource_id: 640}"));
    }

    #[derive(Debug)]
    struct FixedUrls(Vec<String>);

    impl Stager for FixedUrls {
        fn stage(&self, _local_dir: &Path, _remote_name: &str) -> Result<(), Error> {
            Ok(())
        }

        fn chunk_urls(&self, remote_name: &str, table: &str) -> Result<Vec<String>, Error> {
            assert_eq!(remote_name, "640-inferences");
            assert_eq!(table, INFERENCES_TABLE);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn publish_merges_every_chunk() {
        let dir = TempDir::new().unwrap();
        let (client, log) = client(Scripted::default().on(
            &["LOAD CSV"],
            &["COUNT(i)"],
            vec![vec![json!(100)]],
        ));
        let stager = FixedUrls(vec![
            "https://host/640-inferences/inferences.csv.chunks/0_100.csv".to_string(),
            "https://host/640-inferences/inferences.csv.chunks/100_100.csv".to_string(),
        ]);

        assert_eq!(painter(&client, &dir).publish(640, &stager).unwrap(), 200);
        assert_eq!(log.borrow().len(), 2);
        assert!(log.borrow()[1].contains("'https://host/640-inferences/inferences.csv.chunks/100_100.csv'"));
    }

    #[test]
    fn staging_requires_inferences() {
        let dir = TempDir::new().unwrap();
        let (client, _) = client(Scripted::default());
        assert!(matches!(
            painter(&client, &dir).stage(640, &FixedUrls(Vec::new())),
            Err(Error::Staging(_))
        ));
    }

    #[test]
    fn loading_directives() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("directives.tsv");
        fs::write(&file, "page\tstop\tstart\tcomment\n2\t\ttt_2\t\n4\ttt_2\t\t\n6\t\tmissing\t\n").unwrap();
        let (client, log) = client(Scripted::default().on(
            &["resource_pk: 'tt_2'"],
            &["m.eol_pk"],
            vec![vec![json!("R99999-BPstart.2.tt_2")]],
        ));

        let summary = painter(&client, &dir).load_directives(&file, 99999).unwrap();

        assert_eq!(summary, LoadSummary { added: 2, failed: 1 });
        assert!(log.borrow()[1].contains("eol_pk: 'R99999-BPstop.4.tt_2'"));
        assert!(log.borrow()[1].contains("stops_at"));
    }
}
