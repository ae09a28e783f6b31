//! Terminal palette for fiq-screen output and editor notices.

use std::io::IsTerminal;

use fiq_screens::notice::{Notice, NoticeLevel, NoticeSink};
use owo_colors::{AnsiColors, OwoColorize};

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

impl Stream {
    fn is_terminal(self) -> bool {
        match self {
            Self::Out => std::io::stdout().is_terminal(),
            Self::Err => std::io::stderr().is_terminal(),
        }
    }
}

fn paint(stream: Stream, text: &str, color: AnsiColors) -> String {
    if stream.is_terminal() {
        text.color(color).to_string()
    } else {
        text.to_string()
    }
}

/// Confirmation of a completed write.
pub fn success(text: impl AsRef<str>) -> String {
    paint(Stream::Out, text.as_ref(), AnsiColors::Green)
}

/// Fatal error line, printed on stderr.
pub fn error(text: impl AsRef<str>) -> String {
    paint(Stream::Err, text.as_ref(), AnsiColors::Red)
}

/// Screen titles and series names.
pub fn accent(text: impl AsRef<str>) -> String {
    paint(Stream::Out, text.as_ref(), AnsiColors::Cyan)
}

/// Secondary details and "no data" cells.
pub fn muted(text: impl AsRef<str>) -> String {
    let text = text.as_ref();
    if Stream::Out.is_terminal() {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

fn notice_tag(level: NoticeLevel) -> (&'static str, AnsiColors) {
    match level {
        NoticeLevel::Info => ("info", AnsiColors::Cyan),
        NoticeLevel::Precondition => ("skipped", AnsiColors::Yellow),
        NoticeLevel::Error => ("error", AnsiColors::Red),
    }
}

fn render_notice(notice: &Notice, colored: bool) -> String {
    let (tag, color) = notice_tag(notice.level);
    let tag = format!("[{tag}]");
    if colored {
        format!("{} {}", tag.color(color), notice.message)
    } else {
        format!("{tag} {}", notice.message)
    }
}

/// One notice as a stderr line: `[level] message`.
pub fn notice_line(notice: &Notice) -> String {
    render_notice(notice, Stream::Err.is_terminal())
}

/// Prints editor notices to stderr as they arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotices;

impl NoticeSink for TerminalNotices {
    fn notify(&self, notice: Notice) {
        eprintln!("{}", notice_line(&notice));
    }
}
