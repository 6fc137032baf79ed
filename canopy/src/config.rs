//! Typed configuration of the servers and directories a job talks to.
//!
//! A configuration file names locations and groups them into assemblies:
//!
//! ```toml
//! [query]
//! max_tries = 3
//! retry_interval = 15
//!
//! [locations.workspace]
//! path = "/var/canopy"
//!
//! [locations.staging]
//! rsync_location = "stage.example.org:/srv/www/stage/"
//! url = "https://stage.example.org/stage/"
//!
//! [locations.publishing]
//! url = "https://eol.org/"
//! token_file = "/etc/canopy/admin.token"
//!
//! [locations.graphdb]
//! via_api = "publishing"
//!
//! [assemblies.prod]
//! ```
//!
//! An assembly lists a location for each role. A role it does not list is
//! filled by the location carrying the role's own name. [SystemConfig::resolve]
//! turns one assembly into an [Assembly] of typed targets, once, at startup.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::graph::{
    ProxyEndpoint, QueryClient, QueryError, QueryPolicy, QueryTransport, TransactionEndpoint,
};

/// Command used to copy files to the staging server when none is configured.
pub const DEFAULT_RSYNC_COMMAND: &str = "rsync -va";

/// Errors while reading or resolving the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Could not read configuration file \"{path}\": {error}")]
    Read {
        /// The file
        path: PathBuf,
        /// Underlying IO error
        error: std::io::Error,
    },
    /// The configuration is not valid TOML or has the wrong shape
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    /// No assembly with the tag
    #[error("No assembly configured with tag \"{0}\"")]
    UnknownAssembly(String),
    /// A role names a location that does not exist
    #[error("No location \"{location}\" for role {role} in assembly \"{assembly}\"")]
    UnknownLocation {
        /// The role
        role: Role,
        /// Name given for the location
        location: String,
        /// Tag of the assembly
        assembly: String,
    },
    /// A required role has no location
    #[error("No {role} in assembly \"{assembly}\"")]
    MissingRole {
        /// The role
        role: Role,
        /// Tag of the assembly
        assembly: String,
    },
    /// A location lacks a setting that its role requires
    #[error("Location \"{location}\" has no setting \"{field}\"")]
    MissingField {
        /// Name of the location
        location: String,
        /// Name of the setting
        field: &'static str,
    },
    /// The API token could not be read
    #[error("Could not read token file \"{path}\": {error}")]
    TokenFile {
        /// The file
        path: PathBuf,
        /// Underlying IO error
        error: std::io::Error,
    },
}

/// The parts an assembly is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Local directory for all intermediate and output files
    Workspace,
    /// Content repository, source of page id mappings
    Repository,
    /// Publishing web application
    Publishing,
    /// Server that makes local files available over HTTP
    Staging,
    /// The graph database
    Graphdb,
}

impl Role {
    /// Name of the role, also the fallback location name.
    pub fn name(self) -> &'static str {
        match self {
            Role::Workspace => "workspace",
            Role::Repository => "repository",
            Role::Publishing => "publishing",
            Role::Staging => "staging",
            Role::Graphdb => "graphdb",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Retry and throttling policy for all queries
    pub query: QueryPolicy,
    /// Locations by name
    pub locations: BTreeMap<String, LocationConfig>,
    /// Assemblies by tag
    pub assemblies: BTreeMap<String, AssemblyConfig>,
}

/// A place: a directory, a web server, or a database.
/// Which settings matter depends on the role the location plays.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Local directory
    pub path: Option<PathBuf>,
    /// Base URL
    pub url: Option<String>,
    /// URL of a graph database queried directly
    pub neo4j: Option<String>,
    /// User for a directly queried graph database
    pub user: Option<String>,
    /// Password for a directly queried graph database
    pub password: Option<String>,
    /// Name of the location whose API fronts this graph database
    pub via_api: Option<String>,
    /// File holding the API token
    pub token_file: Option<PathBuf>,
    /// File holding an API token with update rights, preferred over [LocationConfig::token_file]
    pub update_token_file: Option<PathBuf>,
    /// Destination prefix for rsync
    pub rsync_location: Option<String>,
    /// Command used to copy files there
    pub rsync_command: Option<String>,
}

/// Names of the locations filling each role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Location for [Role::Workspace]
    pub workspace: Option<String>,
    /// Location for [Role::Repository]
    pub repository: Option<String>,
    /// Location for [Role::Publishing]
    pub publishing: Option<String>,
    /// Location for [Role::Staging]
    pub staging: Option<String>,
    /// Location for [Role::Graphdb]
    pub graphdb: Option<String>,
}

impl AssemblyConfig {
    fn named(&self, role: Role) -> Option<&str> {
        match role {
            Role::Workspace => self.workspace.as_deref(),
            Role::Repository => self.repository.as_deref(),
            Role::Publishing => self.publishing.as_deref(),
            Role::Staging => self.staging.as_deref(),
            Role::Graphdb => self.graphdb.as_deref(),
        }
        .map(str::trim)
    }
}

impl SystemConfig {
    /// Read the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        log::debug!("Read configuration from {}", path.display());
        Self::parse(&text)
    }

    /// Parse the configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Resolve the assembly with the given tag into typed targets.
    pub fn resolve(&self, tag: &str) -> Result<Assembly, ConfigError> {
        let config = self
            .assemblies
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownAssembly(tag.to_string()))?;
        let resolver = Resolver {
            system: self,
            config,
            tag,
        };

        let (workspace_name, workspace) = resolver.required(Role::Workspace)?;
        let workspace = Workspace::new(
            workspace
                .path
                .clone()
                .ok_or_else(|| missing(workspace_name, "path"))?,
        );

        let (staging_name, staging) = resolver.required(Role::Staging)?;
        let staging = StagingTarget {
            rsync_location: staging
                .rsync_location
                .clone()
                .ok_or_else(|| missing(staging_name, "rsync_location"))?,
            rsync_command: staging
                .rsync_command
                .clone()
                .unwrap_or_else(|| DEFAULT_RSYNC_COMMAND.to_string()),
            url: staging
                .url
                .clone()
                .ok_or_else(|| missing(staging_name, "url"))?,
        };

        let (graphdb_name, graphdb) = resolver.required(Role::Graphdb)?;
        let graphdb = resolver.graphdb(graphdb_name, graphdb)?;

        let repository = resolver.optional(Role::Repository)?.map(|(name, location)| {
            Site {
                name: name.to_string(),
                url: location.url.clone(),
            }
        });
        let publishing = resolver.optional(Role::Publishing)?.map(|(name, location)| {
            Site {
                name: name.to_string(),
                url: location.url.clone(),
            }
        });

        log::info!("Resolved assembly {tag}; graph database at {}", graphdb.url());

        Ok(Assembly {
            tag: tag.to_string(),
            policy: self.query,
            workspace,
            staging,
            graphdb,
            repository,
            publishing,
        })
    }
}

fn missing(location: &str, field: &'static str) -> ConfigError {
    ConfigError::MissingField {
        location: location.to_string(),
        field,
    }
}

/// Looks up the locations of one assembly.
struct Resolver<'a> {
    system: &'a SystemConfig,
    config: &'a AssemblyConfig,
    tag: &'a str,
}

impl<'a> Resolver<'a> {
    fn location_name(&self, role: Role) -> &'a str {
        self.config.named(role).unwrap_or(role.name())
    }

    /// The location for `role`, if there is one.
    /// Naming a location that does not exist is an error.
    fn optional(&self, role: Role) -> Result<Option<(&'a str, &'a LocationConfig)>, ConfigError> {
        let name = self.location_name(role);
        match (self.system.locations.get(name), self.config.named(role)) {
            (Some(location), _) => Ok(Some((name, location))),
            (None, Some(_)) => Err(ConfigError::UnknownLocation {
                role,
                location: name.to_string(),
                assembly: self.tag.to_string(),
            }),
            (None, None) => Ok(None),
        }
    }

    fn required(&self, role: Role) -> Result<(&'a str, &'a LocationConfig), ConfigError> {
        self.optional(role)?.ok_or_else(|| ConfigError::MissingRole {
            role,
            assembly: self.tag.to_string(),
        })
    }

    fn graphdb(&self, name: &str, location: &LocationConfig) -> Result<GraphDbTarget, ConfigError> {
        if let Some(url) = &location.neo4j {
            return Ok(GraphDbTarget::Transaction {
                url: url.clone(),
                user: location.user.clone().unwrap_or_default(),
                password: location.password.clone().unwrap_or_default(),
            });
        }

        let api_name = location
            .via_api
            .as_deref()
            .ok_or_else(|| missing(name, "neo4j"))?;
        let api = self.system.locations.get(api_name).ok_or_else(|| {
            ConfigError::UnknownLocation {
                role: Role::Graphdb,
                location: api_name.to_string(),
                assembly: self.tag.to_string(),
            }
        })?;

        let url = api.url.clone().ok_or_else(|| missing(api_name, "url"))?;
        let token_path = api
            .update_token_file
            .as_ref()
            .or(api.token_file.as_ref())
            .ok_or_else(|| missing(api_name, "token_file"))?;
        let token = std::fs::read_to_string(token_path)
            .map_err(|error| ConfigError::TokenFile {
                path: token_path.clone(),
                error,
            })?
            .trim()
            .to_string();

        Ok(GraphDbTarget::Proxy { url, token })
    }
}

/// Local directory for all files of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory `sub` of the resource with the given publishing id:
    /// `<root>/resources/<id>/<sub>`.
    pub fn resource_dir(&self, resource: u64, sub: &str) -> PathBuf {
        self.root
            .join("resources")
            .join(resource.to_string())
            .join(sub)
    }
}

/// Where staged files are copied to and where they can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTarget {
    /// Destination prefix for the copy command
    pub rsync_location: String,
    /// The copy command, split at whitespace before running
    pub rsync_command: String,
    /// Base URL under which the copied files are served
    pub url: String,
}

/// How to reach the graph database.
#[derive(Clone, PartialEq, Eq)]
pub enum GraphDbTarget {
    /// The database's own transactional endpoint
    Transaction {
        /// Server URL
        url: String,
        /// User for basic authentication
        user: String,
        /// Password for basic authentication
        password: String,
    },
    /// The cypher service of the publishing application
    Proxy {
        /// Base URL of the application
        url: String,
        /// API token
        token: String,
    },
}

impl fmt::Debug for GraphDbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction { url, user, .. } => f
                .debug_struct("Transaction")
                .field("url", url)
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Proxy { url, .. } => f
                .debug_struct("Proxy")
                .field("url", url)
                .finish_non_exhaustive(),
        }
    }
}

impl GraphDbTarget {
    /// URL of the server.
    pub fn url(&self) -> &str {
        match self {
            Self::Transaction { url, .. } | Self::Proxy { url, .. } => url,
        }
    }

    /// Open a transport to the database.
    pub fn transport(&self, policy: &QueryPolicy) -> Result<Box<dyn QueryTransport>, QueryError> {
        Ok(match self {
            Self::Transaction {
                url,
                user,
                password,
            } => Box::new(TransactionEndpoint::new(
                url,
                user.as_str(),
                password.as_str(),
                policy.timeout,
            )?),
            Self::Proxy { url, token } => {
                Box::new(ProxyEndpoint::new(url, token.as_str(), policy.timeout)?)
            }
        })
    }

    /// Open a retrying client for the database.
    pub fn connect(&self, policy: QueryPolicy) -> Result<QueryClient, QueryError> {
        Ok(QueryClient::new(self.transport(&policy)?, policy))
    }
}

/// A web site playing a role that only needs its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    /// Name of the location
    pub name: String,
    /// Base URL, if configured
    pub url: Option<String>,
}

/// A resolved assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// Tag the assembly was resolved from
    pub tag: String,
    /// Query policy
    pub policy: QueryPolicy,
    /// Local files
    pub workspace: Workspace,
    /// Staging server
    pub staging: StagingTarget,
    /// Graph database
    pub graphdb: GraphDbTarget,
    /// Content repository, if configured
    pub repository: Option<Site>,
    /// Publishing application, if configured
    pub publishing: Option<Site>,
}

impl Assembly {
    /// Open a retrying client for the graph database.
    pub fn connect(&self) -> Result<QueryClient, QueryError> {
        self.graphdb.connect(self.policy)
    }
}
