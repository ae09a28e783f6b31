//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{bail, Context};
use fiq_screens::api::{ScreenBackend, ScreenPropsPatch};
use fiq_screens::fetch::FetchOutcome;
use fiq_screens::notice::{LogNotices, NoticeSink};
use fiq_screens::time_ctx::parse_local;
use fiq_screens::{ClientConfig, HttpBackend, ScreenEditor, TimeController, TimeMode, WidgetConfig};
use time::PrimitiveDateTime;
use tracing::debug;

use crate::cli::{Cli, TimeArgs};
use crate::style;

/// Effective config: file, then environment, then command-line flags.
pub fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .with_env(),
        None => ClientConfig::discover(&std::env::current_dir().unwrap_or_else(|_| ".".into())),
    };
    Ok(config.with_overrides(cli.api.clone(), cli.token.clone()))
}

pub struct Session {
    backend: Arc<HttpBackend>,
    config: ClientConfig,
    notices: Arc<dyn NoticeSink>,
}

impl Session {
    /// Verbose sessions route notices through tracing; otherwise they are
    /// printed with the terminal palette.
    pub fn new(config: ClientConfig, verbose: bool) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(&config.api)?;
        debug!(base = backend.base_url(), "backend ready");
        let notices: Arc<dyn NoticeSink> = if verbose {
            Arc::new(LogNotices)
        } else {
            Arc::new(style::TerminalNotices)
        };
        Ok(Self {
            backend: Arc::new(backend),
            config,
            notices,
        })
    }

    async fn open(&self, screen: &str) -> anyhow::Result<ScreenEditor<HttpBackend>> {
        ScreenEditor::open(
            Arc::clone(&self.backend),
            screen,
            self.config.clone(),
            Arc::clone(&self.notices),
        )
        .await
        .with_context(|| format!("failed to open screen '{screen}'"))
    }

    pub async fn objects(&self, screen: &str, json: bool) -> anyhow::Result<()> {
        if json {
            let rows = self.backend.load_objects(screen).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }
        let editor = self.open(screen).await?;
        let meta = editor.meta();
        println!(
            "{} {}",
            style::accent(if meta.title.is_empty() { screen } else { meta.title.as_str() }),
            style::muted(format!("({} widgets)", editor.widgets().len()))
        );
        for widget in editor.widgets() {
            let (width, height) = widget.size();
            println!(
                "{:<32} {:<8} {:>8.1} {:>8.1} {:>7.0}x{:<7.0} {}",
                widget.id,
                widget.kind().as_str(),
                widget.x,
                widget.y,
                width,
                height,
                widget.label
            );
        }
        Ok(())
    }

    pub async fn trend(&self, screen: &str, widget: &str, time: &TimeArgs) -> anyhow::Result<()> {
        let editor = self.open(screen).await?;
        apply_time(editor.time(), time)?;
        let feed = editor.chart_feed(widget)?;
        match feed.refresh().await {
            FetchOutcome::Applied => {}
            FetchOutcome::Failed(err) => return Err(err.into()),
            FetchOutcome::Skipped => bail!("chart '{widget}' has no tags"),
            FetchOutcome::Stale => bail!("trend request was superseded"),
        }
        let data = feed.data();
        if let Some(window) = &data.window {
            println!(
                "{}",
                style::muted(format!("{} .. {}", window.start_text(), window.end_text()))
            );
        }
        for series in &data.series {
            println!(
                "{} {}",
                style::accent(&series.label),
                style::muted(format!("({} points)", series.points.len()))
            );
            for point in &series.points {
                let value = point
                    .value
                    .map_or_else(|| style::muted("-"), |value| value.to_string());
                println!("  {}  {value}", point.timestamp);
            }
        }
        Ok(())
    }

    pub async fn table(
        &self,
        screen: &str,
        widget: &str,
        all: bool,
        time: &TimeArgs,
    ) -> anyhow::Result<()> {
        let editor = self.open(screen).await?;
        apply_time(editor.time(), time)?;
        let feed = editor.table_feed(widget)?;
        match feed.reload().await {
            FetchOutcome::Applied => {}
            FetchOutcome::Failed(err) => return Err(err.into()),
            FetchOutcome::Skipped => bail!("table '{widget}' has no tag columns"),
            FetchOutcome::Stale => bail!("table request was superseded"),
        }
        while all && feed.snapshot().has_more() {
            match feed.load_more().await {
                FetchOutcome::Applied => {}
                FetchOutcome::Failed(err) => return Err(err.into()),
                FetchOutcome::Skipped | FetchOutcome::Stale => break,
            }
        }
        print!("{}", feed.to_csv());
        Ok(())
    }

    pub async fn live(&self, screen: &str, watch: bool) -> anyhow::Result<()> {
        let editor = self.open(screen).await?;
        let feed = editor.live_feed();
        let mut ticker = tokio::time::interval(self.config.live.poll);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                _ = ticker.tick() => {}
            }
            feed.poll_once().await?;
            let index = feed.current();
            for widget in editor.widgets() {
                if let WidgetConfig::Tag(tag) = &widget.config {
                    println!("{:<32} {}", widget.label, index.reading(tag).display(2));
                }
            }
            if !watch {
                return Ok(());
            }
            println!();
        }
    }

    pub async fn move_widget(&self, screen: &str, widget: &str, x: f64, y: f64) -> anyhow::Result<()> {
        let editor = self.open(screen).await?;
        editor.move_widget(widget, x, y)?;
        editor.flush().await;
        match editor.sync().snapshot(widget) {
            Some(saved) if saved.position() == (x, y) => {
                println!("{}", style::success(format!("moved '{widget}' to ({x}, {y})")));
                Ok(())
            }
            _ => bail!("widget '{widget}' not saved"),
        }
    }

    pub async fn delete(&self, screen: &str, widget: &str) -> anyhow::Result<()> {
        let editor = self.open(screen).await?;
        editor.delete_widget(widget).await?;
        println!("{}", style::success(format!("deleted '{widget}'")));
        Ok(())
    }

    pub async fn props(&self, screen: &str, patch: ScreenPropsPatch) -> anyhow::Result<()> {
        if patch.is_empty() {
            bail!("nothing to update; pass at least one property flag");
        }
        let editor = self.open(screen).await?;
        let meta = editor.update_props(&patch).await?;
        println!("{}", serde_json::to_string_pretty(&meta)?);
        Ok(())
    }
}

fn parse_time(text: &str) -> anyhow::Result<PrimitiveDateTime> {
    parse_local(text)
        .with_context(|| format!("invalid timestamp '{text}', expected YYYY-MM-DD HH:mm:ss"))
}

fn apply_time(time: &TimeController, args: &TimeArgs) -> anyhow::Result<()> {
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        time.set_mode(TimeMode::Range);
        time.set_range(Some(parse_time(from)?), Some(parse_time(to)?));
    } else if let Some(cursor) = &args.cursor {
        time.set_mode(TimeMode::Cursor);
        time.set_window_minutes(args.window);
        time.set_cursor(Some(parse_time(cursor)?));
    }
    Ok(())
}
