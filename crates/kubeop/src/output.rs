//! Output multiplexing for multi-target sessions.
//!
//! Every target gets a pair of [`TaggedWriter`]s (stdout and stderr). They split
//! the byte stream into lines and push one [`OutputMessage`] per line onto a
//! shared channel. A single [`Renderer`] drains that channel in one of two
//! modes:
//!
//! - [`RenderMode::Live`]: lines are printed in arrival order as they come.
//! - [`RenderMode::Block`]: lines are collected, then printed grouped by
//!   origin, origins sorted lexicographically.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Local};
use colored::{Color, Colorize};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::UnboundedSender;

/// Which remote stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Stdout,
    Stderr,
}

/// One complete line of remote output.
#[derive(Debug, Clone)]
pub struct OutputMessage {
    /// When the line was observed locally.
    pub timestamp: DateTime<Local>,
    pub stream: StreamTag,
    /// Human-readable target identifier.
    pub origin: Arc<str>,
    /// Line content without the trailing newline.
    pub text: String,
}

/// Line-buffering sink that turns written bytes into [`OutputMessage`]s.
///
/// A trailing partial line is emitted on shutdown or drop.
#[derive(Debug)]
pub struct TaggedWriter {
    origin: Arc<str>,
    stream: StreamTag,
    pending: Vec<u8>,
    tx: UnboundedSender<OutputMessage>,
}

impl TaggedWriter {
    #[must_use]
    pub fn new(origin: Arc<str>, stream: StreamTag, tx: UnboundedSender<OutputMessage>) -> Self {
        Self {
            origin,
            stream,
            pending: Vec::new(),
            tx,
        }
    }

    /// Stdout and stderr writers for one origin.
    #[must_use]
    pub fn pair(origin: &str, tx: &UnboundedSender<OutputMessage>) -> (Self, Self) {
        let origin: Arc<str> = Arc::from(origin);
        (
            Self::new(Arc::clone(&origin), StreamTag::Stdout, tx.clone()),
            Self::new(origin, StreamTag::Stderr, tx.clone()),
        )
    }

    fn push(&mut self, buf: &[u8]) {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
    }

    fn flush_partial(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let message = OutputMessage {
            timestamp: Local::now(),
            stream: self.stream,
            origin: Arc::clone(&self.origin),
            text: String::from_utf8_lossy(line).into_owned(),
        };
        // The renderer only goes away once every session has finished.
        let _ = self.tx.send(message);
    }
}

impl AsyncWrite for TaggedWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().push(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().flush_partial();
        Poll::Ready(Ok(()))
    }
}

impl Drop for TaggedWriter {
    fn drop(&mut self) {
        self.flush_partial();
    }
}

/// How collected output is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Print lines interleaved, in arrival order.
    #[default]
    Live,
    /// Print each origin's lines contiguously once all sessions finish.
    Block,
}

impl RenderMode {
    #[must_use]
    pub fn from_block_flag(block: bool) -> Self {
        if block {
            Self::Block
        } else {
            Self::Live
        }
    }
}

/// Writes [`OutputMessage`]s to a terminal or any other sink.
#[derive(Debug)]
pub struct Renderer {
    mode: RenderMode,
    palette: Vec<Color>,
    assigned: HashMap<Arc<str>, Color>,
    color: bool,
}

impl Renderer {
    /// Create a renderer expecting `origins` distinct targets.
    #[must_use]
    pub fn new(mode: RenderMode, origins: usize, color: bool) -> Self {
        Self {
            mode,
            palette: palette(origins),
            assigned: HashMap::new(),
            color,
        }
    }

    /// Drain `messages` into `out` according to the render mode.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `out` fails.
    pub fn render<I, W>(&mut self, messages: I, out: &mut W) -> io::Result<()>
    where
        I: IntoIterator<Item = OutputMessage>,
        W: Write,
    {
        match self.mode {
            RenderMode::Live => {
                for message in messages {
                    self.write_line(&message, out)?;
                    out.flush()?;
                }
            }
            RenderMode::Block => {
                let mut grouped: BTreeMap<Arc<str>, Vec<OutputMessage>> = BTreeMap::new();
                for message in messages {
                    grouped
                        .entry(Arc::clone(&message.origin))
                        .or_default()
                        .push(message);
                }
                for lines in grouped.values() {
                    for message in lines {
                        self.write_line(message, out)?;
                    }
                }
                out.flush()?;
            }
        }
        Ok(())
    }

    fn color_for(&mut self, origin: &Arc<str>) -> Color {
        if let Some(color) = self.assigned.get(origin) {
            return *color;
        }
        let color = self
            .palette
            .get(self.assigned.len() % self.palette.len().max(1))
            .copied()
            .unwrap_or(Color::White);
        self.assigned.insert(Arc::clone(origin), color);
        color
    }

    fn write_line<W: Write>(&mut self, message: &OutputMessage, out: &mut W) -> io::Result<()> {
        let time = message.timestamp.format("%H:%M:%S").to_string();
        if !self.color {
            let separator = match message.stream {
                StreamTag::Stdout => "│",
                StreamTag::Stderr => "!│",
            };
            return writeln!(out, "{time} {} {separator} {}", message.origin, message.text);
        }

        let color = self.color_for(&message.origin);
        let text = match message.stream {
            StreamTag::Stdout => message.text.normal(),
            StreamTag::Stderr => message.text.red(),
        };
        writeln!(
            out,
            "{} {} {} {}",
            time.bright_black(),
            message.origin.color(color),
            "│".bright_black(),
            text
        )
    }
}

/// `count` colours with hues spread evenly around the wheel.
#[must_use]
pub fn palette(count: usize) -> Vec<Color> {
    (0..count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let hue = (i as f64) * 360.0 / (count as f64);
            let (r, g, b) = hsv_to_rgb(hue, 0.6, 0.95);
            Color::TrueColor { r, g, b }
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let chroma = value * saturation;
    let sector = hue / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = value - chroma;
    let scale = |c: f64| ((c + m) * 255.0).round() as u8;
    (scale(r), scale(g), scale(b))
}
