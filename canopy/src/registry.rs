//! Registry of things named by URIs (properties, classes, predicates).
//!
//! Every registered URI gets a short name, which is used as a column name
//! or as a selector in queries (`row.page_id`), so names are kept unique.

use std::collections::HashMap;

use thiserror::Error;

/// Short names and URIs of the properties used throughout.
const PROPERTIES: &[(&str, &str)] = &[
    ("taxon_id", "http://rs.tdwg.org/dwc/terms/taxonID"),
    ("page_id", "http://eol.org/schema/EOLid"),
    ("parent_page_id", "http://eol.org/schema/parentEOLid"),
    ("scientific_name", "http://rs.tdwg.org/dwc/terms/scientificName"),
    ("source", "http://purl.org/dc/terms/source"),
    ("further_information", "http://rs.tdwg.org/ac/terms/furtherInformationURL"),
    ("accepted", "http://rs.tdwg.org/dwc/terms/acceptedNameUsageID"),
    ("parent", "http://rs.tdwg.org/dwc/terms/parentNameUsageID"),
    ("higher_classification", "http://rs.tdwg.org/dwc/terms/higherClassification"),
    ("rank", "http://rs.tdwg.org/dwc/terms/taxonRank"),
    ("taxonomic_status", "http://rs.tdwg.org/dwc/terms/taxonomicStatus"),
    ("taxon_remarks", "http://rs.tdwg.org/dwc/terms/taxonRemarks"),
    ("dataset_id", "http://rs.tdwg.org/dwc/terms/datasetID"),
    ("canonical", "http://rs.gbif.org/terms/1.0/canonicalName"),
    ("annotations", "http://eol.org/schema/EOLidAnnotations"),
    ("landmark", "http://eol.org/schema/Landmark"),
    ("vernacular_string", "http://rs.tdwg.org/dwc/terms/vernacularName"),
    ("language_code", "http://purl.org/dc/terms/language"),
    ("is_preferred_name", "http://rs.gbif.org/terms/1.0/isPreferredName"),
    ("starts_at", "https://eol.org/schema/terms/starts_at"),
    ("stops_at", "https://eol.org/schema/terms/stops_at"),
    ("label", "http://www.w3.org/2000/01/rdf-schema#label"),
    ("comment", "http://www.w3.org/2000/01/rdf-schema#comment"),
    ("resource_id", "data:,EOL resource id"),
    ("resource_version_id", "data:,EOL resource version id"),
];

/// Errors on registration and lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// URIs need a scheme
    #[error("Bad URI: {0}")]
    InvalidUri(String),
    /// The URI is registered already, under another name
    #[error("Redundant registration of {uri} as {requested}; it is registered as {existing}")]
    Redundant {
        /// The URI
        uri: String,
        /// Name it is registered under
        existing: String,
        /// Name that was asked for
        requested: String,
    },
    /// Nothing is registered under the name
    #[error("No denotable registered with name {0}")]
    UnknownName(String),
}

/// Something with a URI and a short name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Denotable {
    uri: String,
    name: String,
}

impl Denotable {
    /// The URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The short name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Two-way index between URIs and short names.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_uri: HashMap<String, Denotable>,
    by_name: HashMap<String, String>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a registry holding the known properties.
    pub fn with_properties() -> Self {
        let mut registry = Self::new();
        for (name, uri) in PROPERTIES {
            registry.by_name.insert(name.to_string(), uri.to_string());
            registry.by_uri.insert(
                uri.to_string(),
                Denotable {
                    uri: uri.to_string(),
                    name: name.to_string(),
                },
            );
        }
        registry
    }

    /// Register `uri`, preferably under `hint`.
    ///
    /// Registering a URI again with the same name (or without a name)
    /// returns the existing entry. If the name is taken by another URI,
    /// the first free name among `hint_2`, `hint_3`, ... is used instead.
    /// Without a hint, the last segment of the URI serves as the name.
    pub fn register(&mut self, uri: &str, hint: Option<&str>) -> Result<&Denotable, RegistryError> {
        if !uri.contains(':') {
            return Err(RegistryError::InvalidUri(uri.to_string()));
        }

        if let Some(existing) = self.by_uri.get(uri) {
            if let Some(requested) = hint.filter(|requested| *requested != existing.name) {
                return Err(RegistryError::Redundant {
                    uri: uri.to_string(),
                    existing: existing.name.clone(),
                    requested: requested.to_string(),
                });
            }
        } else {
            let base = hint.map(str::to_string).unwrap_or_else(|| default_name(uri));
            let mut name = base.clone();
            let mut counter = 1;
            while self.by_name.contains_key(&name) {
                counter += 1;
                name = format!("{base}_{counter}");
            }
            if name != base {
                log::debug!("Name {base} is taken; registering {uri} as {name}");
            }

            self.by_name.insert(name.clone(), uri.to_string());
            self.by_uri.insert(
                uri.to_string(),
                Denotable {
                    uri: uri.to_string(),
                    name,
                },
            );
        }

        Ok(&self.by_uri[uri])
    }

    /// Remove the entry for `uri`.
    pub fn deregister(&mut self, uri: &str) -> Option<Denotable> {
        let denotable = self.by_uri.remove(uri)?;
        self.by_name.remove(&denotable.name);
        Some(denotable)
    }

    /// Look up by URI.
    pub fn by_uri(&self, uri: &str) -> Option<&Denotable> {
        self.by_uri.get(uri)
    }

    /// Look up by short name.
    pub fn by_name(&self, name: &str) -> Option<&Denotable> {
        self.by_name.get(name).and_then(|uri| self.by_uri.get(uri))
    }

    /// Look up by short name, failing if it is unknown.
    pub fn named(&self, name: &str) -> Result<&Denotable, RegistryError> {
        self.by_name(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_uri.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }
}

/// Last path segment or fragment of a URI.
fn default_name(uri: &str) -> String {
    uri.rsplit(['/', '#', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(uri)
        .to_string()
}
