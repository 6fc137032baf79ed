//! Start and stop directives, and the tab-separated files they are authored in.
//!
//! A directive file has a header row with (at least) a `page` column and
//! optional `stop`, `start` and `comment` columns:
//!
//! ```text
//! page	stop	start	comment
//! 1234		T-56	start here
//! 5678	T-56		but not below here
//! ```

use std::{fmt, path::Path};

use csv::ReaderBuilder;

use crate::error::Error;

/// Whether a directive starts or stops the propagation of a trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirectiveKind {
    /// Propagate the trait to everything below the page
    Start,
    /// Propagate the trait to nothing at or below the page
    Stop,
}

impl DirectiveKind {
    /// Both kinds, starts first.
    pub const ALL: [DirectiveKind; 2] = [DirectiveKind::Start, DirectiveKind::Stop];

    /// Lower case name, as used in directive files and identifiers.
    pub fn tag(self) -> &'static str {
        match self {
            DirectiveKind::Start => "start",
            DirectiveKind::Stop => "stop",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectiveKind::Start => "Start",
            DirectiveKind::Stop => "Stop",
        })
    }
}

/// An instruction that a trait's propagation starts or stops at a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Directive {
    /// Page the directive is anchored at
    pub page_id: u64,
    /// `resource_pk` of the trait
    pub trait_pk: String,
    /// Start or stop
    pub kind: DirectiveKind,
}

impl Directive {
    /// Create a directive.
    pub fn new(kind: DirectiveKind, page_id: u64, trait_pk: impl Into<String>) -> Self {
        Self {
            page_id,
            trait_pk: trait_pk.into(),
            kind,
        }
    }

    /// Identifier of the metadata node holding the directive.
    /// Unique only within a resource.
    pub fn eol_pk(&self, resource: u64) -> String {
        format!(
            "R{resource}-BP{}.{}.{}",
            self.kind.tag(),
            self.page_id,
            self.trait_pk
        )
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.kind.tag(), self.page_id, self.trait_pk)
    }
}

/// Read all directives from a tab-separated file.
///
/// A row may hold a stop and a start directive at once; the stop comes first.
pub fn read_directives(path: &Path) -> Result<Vec<Directive>, Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|header| header.trim() == name);
    let page = column("page").ok_or_else(|| Error::MissingColumn {
        column: "page".to_string(),
        filename: path.to_path_buf(),
    })?;
    let stop = column("stop");
    let start = column("start");

    let mut directives = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let number = index as u64 + 1;
        let field = |position: Option<usize>| {
            position
                .and_then(|position| record.get(position))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let page_text = field(Some(page)).ok_or_else(|| Error::Directive {
            filename: path.to_path_buf(),
            record: number,
            message: "no page".to_string(),
        })?;
        let page_id = page_text.parse().map_err(|_| Error::Directive {
            filename: path.to_path_buf(),
            record: number,
            message: format!("page {page_text:?} is not a page id"),
        })?;

        for (kind, position) in [(DirectiveKind::Stop, stop), (DirectiveKind::Start, start)] {
            if let Some(trait_pk) = field(position) {
                directives.push(Directive::new(kind, page_id, trait_pk));
            }
        }
    }

    log::debug!("Read {} directives from {}", directives.len(), path.display());
    Ok(directives)
}

#[cfg(test)]
mod test {
    use assert_fs::{prelude::*, TempDir};
    use test_log::test;

    use super::*;

    #[test]
    fn identifiers() {
        let directive = Directive::new(DirectiveKind::Start, 500000002, "tt_2");
        assert_eq!(directive.eol_pk(99999), "R99999-BPstart.500000002.tt_2");
        assert_eq!(directive.to_string(), "start(500000002,tt_2)");
        assert_eq!(DirectiveKind::Stop.to_string(), "Stop");
    }

    #[test]
    fn reading() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("directives.tsv");
        file.write_str(
            "page\tstop\tstart\tcomment\n\
             12\t\tT-1\tstart here\n\
             34\tT-1\t\n\
             56\tT-2\tT-3\tboth\n",
        )
        .unwrap();

        let directives = read_directives(file.path()).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::new(DirectiveKind::Start, 12, "T-1"),
                Directive::new(DirectiveKind::Stop, 34, "T-1"),
                Directive::new(DirectiveKind::Stop, 56, "T-2"),
                Directive::new(DirectiveKind::Start, 56, "T-3"),
            ]
        );
    }

    #[test]
    fn page_column_is_required() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("directives.tsv");
        file.write_str("node\tstart\n12\tT-1\n").unwrap();
        assert!(matches!(
            read_directives(file.path()),
            Err(Error::MissingColumn { column, .. }) if column == "page"
        ));
    }

    #[test]
    fn bad_page_is_reported_with_record() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("directives.tsv");
        file.write_str("page\tstart\n12\tT-1\nx\tT-2\n").unwrap();
        assert!(matches!(
            read_directives(file.path()),
            Err(Error::Directive { record: 2, .. })
        ));
    }
}
