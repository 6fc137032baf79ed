//! Making local files reachable by URL, so the database can bulk load them.

use std::{fmt::Debug, path::Path, process::Command};

use crate::{
    config::StagingTarget,
    error::Error,
    graph::{http::HttpSession, QueryError},
    manifest::{self, MANIFEST_NAME},
    paginator::CHUNKS_SUFFIX,
};

/// Copies directories to a staging server and tells where their tables can be fetched.
pub trait Stager: Debug {
    /// Copy the contents of `local_dir` to the remote directory `remote_name`.
    fn stage(&self, local_dir: &Path, remote_name: &str) -> Result<(), Error>;

    /// URLs of the pieces of `table` inside the remote directory `remote_name`.
    ///
    /// These are the chunks listed in the table's manifest, or the table
    /// itself if it was not chunked.
    fn chunk_urls(&self, remote_name: &str, table: &str) -> Result<Vec<String>, Error>;
}

/// Stages with an rsync-like command and reads manifests over HTTP.
#[derive(Debug)]
pub struct RsyncStager {
    target: StagingTarget,
    session: HttpSession,
}

impl RsyncStager {
    /// Create a stager for the given target.
    pub fn new(target: StagingTarget, timeout: std::time::Duration) -> Result<Self, QueryError> {
        Ok(Self {
            target,
            session: HttpSession::new(timeout)?,
        })
    }

    /// Destination of `remote_name` for the copy command.
    pub fn destination(&self, remote_name: &str) -> String {
        format!("{}{remote_name}/", with_slash(&self.target.rsync_location))
    }

    /// URL of the remote directory `remote_name`.
    pub fn url(&self, remote_name: &str) -> String {
        format!("{}{remote_name}/", with_slash(&self.target.url))
    }
}

impl Stager for RsyncStager {
    fn stage(&self, local_dir: &Path, remote_name: &str) -> Result<(), Error> {
        let mut words = self.target.rsync_command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Staging("empty copy command".to_string()))?;

        let source = format!("{}/", local_dir.display());
        let destination = self.destination(remote_name);
        log::info!("Copying {source} to {destination}");

        let output = Command::new(program)
            .args(words)
            .arg(&source)
            .arg(&destination)
            .output()?;
        log::debug!("{}", String::from_utf8_lossy(&output.stdout));

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Staging(format!(
                "{} exited with {}: {}",
                self.target.rsync_command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn chunk_urls(&self, remote_name: &str, table: &str) -> Result<Vec<String>, Error> {
        let table_url = format!("{}{table}", self.url(remote_name));
        let chunks_url = format!("{table_url}{CHUNKS_SUFFIX}/");
        let manifest_url = format!("{chunks_url}{MANIFEST_NAME}");

        log::debug!("Fetching {manifest_url}");
        let reply = self.session.send(self.session.client().get(&manifest_url))?;
        match reply.status {
            404 => {
                log::info!("No manifest at {manifest_url}; using {table_url}");
                Ok(vec![table_url])
            }
            _ if reply.is_success() => {
                let names = manifest::parse_manifest(&reply.body)?;
                log::info!("Manifest lists {} chunks", names.len());
                Ok(manifest::chunk_urls(&chunks_url, &names))
            }
            _ => Err(reply.status_error().into()),
        }
    }
}

fn with_slash(prefix: &str) -> String {
    if prefix.ends_with('/') || prefix.ends_with(':') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}
