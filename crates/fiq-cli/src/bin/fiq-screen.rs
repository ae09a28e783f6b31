//! CLI entrypoint for FactoryIQ user screens.

#[path = "fiq-screen/cli.rs"]
mod cli;
#[path = "fiq-screen/commands.rs"]
mod commands;
#[path = "fiq-screen/style.rs"]
mod style;

use clap::Parser;
use fiq_screens::api::ScreenPropsPatch;

use cli::{Cli, Command};
use commands::Session;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli).await {
        eprintln!("{}", style::error(format!("Error: {err:#}")));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let session = Session::new(commands::load_config(&cli)?, cli.verbose)?;
    match cli.command {
        Command::Objects { screen, json } => session.objects(&screen, json).await,
        Command::Trend {
            screen,
            widget,
            time,
        } => session.trend(&screen, &widget, &time).await,
        Command::Table {
            screen,
            widget,
            all,
            time,
        } => session.table(&screen, &widget, all, &time).await,
        Command::Live { screen, watch } => session.live(&screen, watch).await,
        Command::Move {
            screen,
            widget,
            x,
            y,
        } => session.move_widget(&screen, &widget, x, y).await,
        Command::Delete { screen, widget } => session.delete(&screen, &widget).await,
        Command::Props {
            screen,
            bg_color,
            public,
            readonly,
            width,
            height,
        } => {
            let patch = ScreenPropsPatch {
                is_public: public,
                is_readonly: readonly,
                area_width: width,
                area_height: height,
                bg_color,
            };
            session.props(&screen, patch).await
        }
    }
}
