/*!
  Binary for the CLI of canopy: cnp
*/

#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts
)]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    variant_size_differences
)]

pub mod cli;
pub mod error;

use canopy::{
    config::{Assembly, SystemConfig},
    manifest,
    paginator::{ChunkedQuery, Outcome},
    registry::Registry,
    staging::RsyncStager,
    BranchPainter, Paginator, QueryClient,
};
use clap::Parser;
use cli::{CliApp, Command, SystemArgs};
use colored::Colorize;
use error::CliError;

impl SystemArgs {
    fn resource(&self) -> Result<u64, CliError> {
        self.resource.ok_or(CliError::NoResource)
    }

    fn assembly(&self) -> Result<Assembly, CliError> {
        let tag = self.assembly.as_deref().ok_or(CliError::NoAssembly)?;
        let config = SystemConfig::load(&self.config)?;
        Ok(config.resolve(tag)?)
    }

    /// Resolve the assembly and open a client for its graph database.
    fn connect(&self) -> Result<(Assembly, QueryClient), CliError> {
        let assembly = self.assembly()?;
        let client = assembly.connect()?;
        Ok((assembly, client))
    }
}

fn painter<'a>(
    client: &'a QueryClient,
    assembly: &Assembly,
    page_size: Option<u64>,
) -> Result<BranchPainter<'a>, CliError> {
    let mut painter = BranchPainter::new(
        client,
        assembly.workspace.clone(),
        &Registry::with_properties(),
    )?;
    if let Some(page_size) = page_size {
        painter = painter.with_page_size(page_size);
    }
    Ok(painter)
}

fn run(cli: CliApp) -> Result<(), CliError> {
    let system = &cli.system;

    match cli.command {
        Command::Manifests { dir } => {
            for path in manifest::write_manifests(&dir)? {
                println!("{}", path.display());
            }
        }
        Command::Query {
            query,
            output,
            chunk_size,
            no_skip,
            headings,
        } => {
            let (_, client) = system.connect()?;
            let mut chunked = ChunkedQuery::new(query, &output)
                .chunk_size(chunk_size)
                .skipping(!no_skip);
            if let Some(headings) = headings {
                chunked = chunked.headings(headings);
            }
            match Paginator::new(&client).supervise(&chunked) {
                Outcome::Failed => return Err(CliError::QueryFailed { output }),
                Outcome::Cached(path) => println!("{} (cached)", path.display()),
                Outcome::Written { path, rows } => println!("{} ({rows} rows)", path.display()),
                Outcome::NoFile => println!("no rows"),
            }
        }
        Command::Directives => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            println!("trait,which,page_id,canonical,parent_id");
            for row in painter(&client, &assembly, None)?.show_directives(resource)? {
                println!(
                    "{},{},{},{},{}",
                    row.trait_pk,
                    row.kind,
                    row.page_id.map(|id| id.to_string()).unwrap_or_default(),
                    row.canonical,
                    row.parent_id.map(|id| id.to_string()).unwrap_or_default()
                );
            }
        }
        Command::Qc => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            let report = painter(&client, &assembly, None)?.qc(resource)?;
            for finding in report.findings() {
                println!("{finding}");
            }
            if report.is_clean() {
                println!("{}", "No problems found".green().bold());
            } else {
                println!(
                    "{}",
                    format!("{} problems found", report.findings().len())
                        .yellow()
                        .bold()
                );
            }
        }
        Command::Infer { page_size } => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            let summary = painter(&client, &assembly, page_size)?.infer(resource)?;
            println!(
                "Net: {} inferences ({} asserted, {} duplicates, {} retracted) in {}",
                summary.net.to_string().green().bold(),
                summary.asserted,
                summary.duplicates,
                summary.retracted,
                summary.path.display()
            );
        }
        Command::Stage => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            let stager = RsyncStager::new(assembly.staging.clone(), assembly.policy.timeout)?;
            painter(&client, &assembly, None)?.stage(resource, &stager)?;
        }
        Command::Publish => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            let stager = RsyncStager::new(assembly.staging.clone(), assembly.policy.timeout)?;
            let merged = painter(&client, &assembly, None)?.publish(resource, &stager)?;
            println!("Merged {} relations", merged.to_string().green().bold());
        }
        Command::Count => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            println!("{}", painter(&client, &assembly, None)?.count(resource)?);
        }
        Command::Erase => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            println!("{}", painter(&client, &assembly, None)?.erase(resource)?);
        }
        Command::LoadDirectives { file } => {
            let (assembly, client) = system.connect()?;
            let resource = system.resource()?;
            let summary = painter(&client, &assembly, None)?.load_directives(&file, resource)?;
            println!("Added {}, failed {}", summary.added, summary.failed);
        }
    }

    Ok(())
}

fn main() {
    let cli = CliApp::parse();

    cli.logging.initialize_logging();
    log::info!("Version: {}", clap::crate_version!());
    log::debug!("Command: {:?}", cli.command);

    run(cli).unwrap_or_else(|err| {
        log::error!("{} {err}", "error:".red().bold());
        std::process::exit(1)
    })
}
