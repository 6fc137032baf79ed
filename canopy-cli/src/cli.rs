//! Contains structures and functionality for the binary
use std::path::PathBuf;

/// Configuration file used when none is given.
const DEFAULT_CONFIG_FILE: &str = "config/config.toml";

/// Cli Arguments related to logging
#[derive(clap::Args, Debug)]
pub(crate) struct LoggingArgs {
    /// Increase log verbosity (multiple uses increase verbosity further)
    #[arg(short, long, action = clap::builder::ArgAction::Count, group = "verbosity")]
    verbose: u8,
    /// Reduce log verbosity to show only errors (equivalent to --log error)
    #[arg(short, long, group = "verbosity")]
    quiet: bool,
    /// Set log verbosity (default is "warn")
    #[arg(long = "log", value_parser=clap::builder::PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]), group = "verbosity")]
    log_level: Option<String>,
}

impl LoggingArgs {
    /// Initialising Logging
    ///
    /// Sets the logging verbosity to the given log-level in the following order:
    ///  * `Info`, `Debug`, `Trace`; depending on the count of `-v`
    ///  * `Error` when `-q` is used
    ///  * The `CANOPY_LOG` environment variable value
    ///  * `Warn` otherwise
    pub(crate) fn initialize_logging(&self) {
        let mut builder = env_logger::Builder::new();

        // Default log level
        builder.filter_level(log::LevelFilter::Warn);

        builder.parse_env("CANOPY_LOG");
        if let Some(ref level) = self.log_level {
            builder.parse_filters(level);
        } else if self.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if self.verbose > 0 {
            builder.filter_level(match self.verbose {
                1 => log::LevelFilter::Info,
                2 => log::LevelFilter::Debug,
                3 => log::LevelFilter::Trace,
                _ => log::LevelFilter::Warn,
            });
        }
        builder.init();
    }
}

/// Cli arguments selecting the servers to talk to
#[derive(clap::Args, Debug)]
pub(crate) struct SystemArgs {
    /// Configuration file listing locations and assemblies
    #[arg(long = "config", env = "CANOPY_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub(crate) config: PathBuf,
    /// Tag of the assembly to use
    #[arg(short = 'a', long = "assembly", env = "CANOPY_ASSEMBLY", global = true)]
    pub(crate) assembly: Option<String>,
    /// Publishing id of the resource to work on
    #[arg(short = 'r', long = "resource", env = "CANOPY_RESOURCE", global = true)]
    pub(crate) resource: Option<u64>,
}

/// What to do
#[derive(clap::Subcommand, Debug)]
pub(crate) enum Command {
    /// List the start and stop directives of a resource
    Directives,
    /// Check the directives of a resource for problems
    Qc,
    /// Compute the inferred trait assertions of a resource and write them to files
    Infer {
        /// Rows per sub-query and per output chunk
        #[arg(long = "page-size", value_parser = clap::value_parser!(u64).range(1..))]
        page_size: Option<u64>,
    },
    /// Copy the inference files of a resource to the staging server
    Stage,
    /// Add the staged inferences of a resource to the graph database
    Publish,
    /// Count the inferred trait assertions of a resource in the graph database
    Count,
    /// Remove the inferred trait assertions of a resource from the graph database
    Erase,
    /// Add the directives listed in a tab-separated file to the graph database
    LoadDirectives {
        /// File with columns page, stop, start, comment
        #[arg(value_parser)]
        file: PathBuf,
    },
    /// Run a query in chunks and write its result as CSV
    Query {
        /// The query, without SKIP or LIMIT
        query: String,
        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
        /// Rows per sub-query (default is a single unbounded query)
        #[arg(long = "chunk-size", value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: Option<u64>,
        /// The query does not tolerate SKIP; issue a single sub-query
        #[arg(long = "no-skip")]
        no_skip: bool,
        /// Column names to use instead of those returned by the server, separated by commas
        #[arg(long = "headings", value_delimiter = ',')]
        headings: Option<Vec<String>>,
    },
    /// Write a manifest into every chunk directory below a directory
    Manifests {
        /// Directory to walk
        #[arg(value_parser)]
        dir: PathBuf,
    },
}

/// Canopy CLI
#[derive(clap::Parser, Debug)]
#[command(author, version, about)]
pub struct CliApp {
    /// Command to run
    #[command(subcommand)]
    pub(crate) command: Command,
    /// Arguments selecting servers and resource
    #[command(flatten)]
    pub(crate) system: SystemArgs,
    /// Arguments related to logging
    #[command(flatten)]
    pub(crate) logging: LoggingArgs,
}
