//! Output formatting for CLI commands.
//!
//! Reports are written either as tables or as pretty JSON. Streams from
//! `watch` are written one line per event (compact JSON in JSON mode).

use std::io::Write;

use chrono::{DateTime, Utc};
use ratelane_live::ConnectionState;
use ratelane_proto::{ApiHealth, BreakerState, ChannelEvent, Plan};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a report.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }

    /// Write one streamed line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_line<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + LineDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => writeln!(writer, "{}", value.line())?,
        }
        writer.flush()?;
        Ok(())
    }

    /// Write a report to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Types that render as one human-readable line.
pub trait LineDisplay {
    /// The line, without a trailing newline.
    fn line(&self) -> String;
}

/// Result of an access check.
#[derive(Debug, Clone, Serialize)]
pub struct AccessReport {
    /// Channel checked.
    pub channel: String,
    /// Plan checked.
    pub plan: Plan,
    /// Plan the channel requires.
    pub required: Plan,
    /// Whether `plan` may receive the channel live.
    pub has_access: bool,
}

impl TableDisplay for AccessReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Channel:   {}", self.channel)?;
        writeln!(writer, "Plan:      {}", self.plan)?;
        writeln!(writer, "Requires:  {}", self.required)?;
        let mode = if self.has_access {
            "live"
        } else {
            "polling (upgrade for live data)"
        };
        writeln!(writer, "Mode:      {mode}")?;
        Ok(())
    }
}

/// One row of the channel list.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRow {
    /// Channel name.
    pub channel: String,
    /// Required plan.
    pub required: Plan,
}

/// Channels and their requirements.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelList {
    /// Rows sorted by channel.
    pub channels: Vec<ChannelRow>,
}

impl TableDisplay for ChannelList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{:<32}  {:<10}", "CHANNEL", "REQUIRES")?;
        writeln!(writer, "{}", "─".repeat(44))?;
        for row in &self.channels {
            writeln!(writer, "{:<32}  {:<10}", row.channel, row.required)?;
        }
        Ok(())
    }
}

/// Where a streamed event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Pushed over the live channel.
    Live,
    /// Fetched by the polling fallback.
    Poll,
}

/// One streamed event.
#[derive(Debug, Clone, Serialize)]
pub struct WatchLine {
    /// Origin.
    pub source: Source,
    /// Channel name.
    pub channel: String,
    /// Receive time.
    pub received_at: DateTime<Utc>,
    /// Short human summary.
    #[serde(skip)]
    pub summary: String,
    /// Raw payload.
    pub data: serde_json::Value,
}

impl LineDisplay for WatchLine {
    fn line(&self) -> String {
        let source = match self.source {
            Source::Live => "live",
            Source::Poll => "poll",
        };
        format!(
            "{} [{source}] {:<28} {}",
            self.received_at.format("%H:%M:%S"),
            self.channel,
            self.summary
        )
    }
}

/// A connection state change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusLine {
    /// New state.
    pub status: ConnectionState,
    /// Whether the feature is polling now.
    pub polling: bool,
}

impl LineDisplay for StatusLine {
    fn line(&self) -> String {
        if self.polling {
            format!("-- {} (polling)", self.status)
        } else {
            format!("-- {}", self.status)
        }
    }
}

/// One-line summary of a typed event.
#[must_use]
pub fn summarize(event: &ChannelEvent) -> String {
    match event {
        ChannelEvent::Usage(p) => format!(
            "{}: {} requests, {} rate limited, {} errors",
            p.api_id, p.requests, p.rate_limited, p.errors
        ),
        ChannelEvent::Stats(s) => format!(
            "{} requests, {} rate limited, {} APIs, {:.1}ms avg",
            s.total_requests, s.rate_limited_requests, s.active_apis, s.avg_latency_ms
        ),
        ChannelEvent::Alert(a) => format!(
            "{:?} {}{}",
            a.severity,
            a.api_id.as_deref().map(|id| format!("{id}: ")).unwrap_or_default(),
            a.message
        ),
        ChannelEvent::CircuitBreaker(c) => format!(
            "{}: {} -> {}",
            c.api_id,
            breaker(c.previous),
            breaker(c.current)
        ),
        ChannelEvent::Request(r) => format!(
            "{} {} {} {} {}ms{}",
            r.api_id,
            r.method,
            truncate(&r.path, 40),
            r.status,
            r.latency_ms,
            if r.rate_limited { " (rate limited)" } else { "" }
        ),
        ChannelEvent::ApiStatus(s) => format!(
            "{}: {}{}",
            s.api_id,
            health(s.status),
            s.message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default()
        ),
    }
}

const fn breaker(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half-open",
    }
}

const fn health(status: ApiHealth) -> &'static str {
    match status {
        ApiHealth::Healthy => "healthy",
        ApiHealth::Degraded => "degraded",
        ApiHealth::Down => "down",
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
