//! CLI argument parsing for Mystic

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Event rendering mode selectable from the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable text on stderr (default)
    Console,
    /// Human-readable rotating file under the log directory
    File,
    /// One JSON-RPC object per event on stdout
    JsonRpc,
    /// key=value pairs on stderr
    Structured,
    /// Indented JSON with direction arrows
    McpDebug,
}

impl From<LogFormatArg> for crate::logger::LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Console => crate::logger::LogFormat::Console,
            LogFormatArg::File => crate::logger::LogFormat::File,
            LogFormatArg::JsonRpc => crate::logger::LogFormat::JsonRpc,
            LogFormatArg::Structured => crate::logger::LogFormat::Structured,
            LogFormatArg::McpDebug => crate::logger::LogFormat::McpDebug,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mystic")]
#[command(version)]
#[command(about = "Runtime function-control plane with an MCP tool surface", long_about = None)]
pub struct Cli {
    /// Project root to discover functions under (defaults to cwd)
    #[arg(long = "root", value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Event format for call logging
    #[arg(long = "log-format", value_enum, default_value = "console")]
    pub log_format: LogFormatArg,

    /// Disable sensitive-data redaction in emitted events
    #[arg(long = "no-redact")]
    pub no_redact: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the MCP tool surface over stdio (one JSON-RPC object per line)
    Serve,
    /// List functions found under the project root
    Discover {
        /// Substring filter on module paths
        #[arg(long = "module", value_name = "FILTER")]
        module_filter: Option<String>,
        /// Include private functions
        #[arg(long = "private")]
        include_private: bool,
    },
    /// Analyze one function in a source file
    Inspect {
        /// Source file containing the function
        file: PathBuf,
        /// Function name (methods as Type::method)
        function: String,
    },
    /// Print the JSON schema derived from a function's signature
    Schema {
        /// Source file containing the function
        file: PathBuf,
        /// Function name (methods as Type::method)
        function: String,
    },
}
