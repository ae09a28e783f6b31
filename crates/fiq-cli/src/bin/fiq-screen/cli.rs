//! CLI definitions for fiq-screen.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fiq-screen",
    version,
    about = "Inspect and edit FactoryIQ user screens",
    infer_subcommands = true,
    after_help = "Examples:\n  fiq-screen objects 42\n  fiq-screen trend 42 chart_1718000000000_1 --from '2024-03-01 08:00:00' --to '2024-03-01 12:00:00'\n  fiq-screen table 42 table_1718000000000_2 --all > export.csv\n  fiq-screen move 42 Line1__Flow 120 80"
)]
pub struct Cli {
    /// Show debug logs.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Config file (defaults to fiq.toml in the current directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// API base URL override.
    #[arg(long, global = true, env = "FIQ_API_BASE")]
    pub api: Option<String>,
    /// Bearer token override.
    #[arg(long, global = true, env = "FIQ_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the widgets of a screen.
    Objects {
        /// Screen id.
        screen: String,
        /// Print raw JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Fetch the trend data of a chart widget.
    Trend {
        /// Screen id.
        screen: String,
        /// Chart widget id.
        widget: String,
        #[command(flatten)]
        time: TimeArgs,
    },
    /// Export a table widget as CSV.
    Table {
        /// Screen id.
        screen: String,
        /// Table widget id.
        widget: String,
        /// Follow paging until every row is loaded.
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        time: TimeArgs,
    },
    /// Print live values of the screen's tags.
    Live {
        /// Screen id.
        screen: String,
        /// Keep polling until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Move a widget (canvas coordinates).
    Move {
        /// Screen id.
        screen: String,
        /// Widget id.
        widget: String,
        x: f64,
        y: f64,
    },
    /// Delete a widget.
    Delete {
        /// Screen id.
        screen: String,
        /// Widget id.
        widget: String,
    },
    /// Update screen properties.
    Props {
        /// Screen id.
        screen: String,
        /// Canvas background color.
        #[arg(long)]
        bg_color: Option<String>,
        /// Publish or unpublish the screen.
        #[arg(long)]
        public: Option<bool>,
        /// Lock or unlock editing.
        #[arg(long)]
        readonly: Option<bool>,
        /// Canvas width.
        #[arg(long)]
        width: Option<f64>,
        /// Canvas height.
        #[arg(long)]
        height: Option<f64>,
    },
}

/// Time-travel selection shared by data commands.
#[derive(Debug, Clone, Args)]
pub struct TimeArgs {
    /// Range start, `YYYY-MM-DD HH:mm:ss` local time.
    #[arg(long, requires = "to", conflicts_with = "cursor")]
    pub from: Option<String>,
    /// Range end, `YYYY-MM-DD HH:mm:ss` local time.
    #[arg(long, requires = "from")]
    pub to: Option<String>,
    /// Replay cursor, `YYYY-MM-DD HH:mm:ss` local time.
    #[arg(long)]
    pub cursor: Option<String>,
    /// Window around the cursor in minutes.
    #[arg(long, default_value = "60")]
    pub window: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn range_needs_both_ends() {
        let parsed = Cli::try_parse_from([
            "fiq-screen",
            "trend",
            "42",
            "chart_1",
            "--from",
            "2024-03-01 08:00:00",
            "--to",
            "2024-03-01 12:00:00",
        ])
        .expect("range");
        match parsed.command {
            Command::Trend { time, .. } => {
                assert_eq!(time.from.as_deref(), Some("2024-03-01 08:00:00"));
                assert_eq!(time.window, 60);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from([
            "fiq-screen",
            "trend",
            "42",
            "chart_1",
            "--from",
            "2024-03-01 08:00:00",
        ])
        .is_err());
    }
}
