//! Stream a dashboard feature.
//!
//! Events arrive over the live channel when the plan allows it and the
//! connection is healthy. Otherwise the REST endpoint for the feature is
//! polled at the fallback cadence. Both sources land in the same stream.

use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use ratelane_live::{FacadeStatus, FallbackPoller, LiveConfig, LiveProvider, RestFetcher};
use ratelane_proto::{ChannelEvent, InboundEvent};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, Source, StatusLine, WatchLine, summarize};

/// Watch command executor.
pub struct WatchCommand {
    config: LiveConfig,
    api_base: String,
}

impl WatchCommand {
    /// Create a watch command.
    #[must_use]
    pub fn new(config: LiveConfig, api_base: impl Into<String>) -> Self {
        Self {
            config,
            api_base: api_base.into(),
        }
    }

    /// REST URL polled for `args.feature`.
    #[must_use]
    pub fn poll_url(&self, args: &WatchArgs) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            args.feature.rest_path()
        )
    }

    /// Execute the watch command until the limit, the duration or Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or output fails.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &WatchArgs,
    ) -> Result<(), CliError> {
        let fetcher = RestFetcher::new(self.poll_url(args))?;
        let provider = LiveProvider::connect_ws(&self.config)?;
        provider.set_plan(args.plan);

        let facade = provider.facade(args.feature.channel());
        let (tx, mut rx) = mpsc::unbounded_channel::<WatchLine>();

        let live_tx = tx.clone();
        let live_channel = facade.channel().to_string();
        let api_filter = args.api_id.clone();
        let subscription = facade.subscribe(facade.channel(), move |data| {
            let inbound = InboundEvent::new(live_channel.clone(), data.clone());
            let event = ChannelEvent::decode(&inbound)?;
            if !matches_filter(api_filter.as_deref(), &event) {
                return Ok(());
            }
            let line = WatchLine {
                source: Source::Live,
                channel: inbound.channel,
                received_at: inbound.received_at,
                summary: summarize(&event),
                data: inbound.data,
            };
            // The receiver only goes away while shutting down.
            let _ = live_tx.send(line);
            Ok(())
        });
        if !subscription.is_active() {
            info!(
                channel = %facade.channel(),
                required = %facade.required_plan(),
                "live data not available on this plan, polling instead"
            );
        }

        let cancel = CancellationToken::new();
        let poller = FallbackPoller::new(facade.clone(), fetcher);
        let poll_channel = facade.channel().to_string();
        let poll_task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                poller
                    .run(
                        move |data| {
                            let line = WatchLine {
                                source: Source::Poll,
                                channel: poll_channel.clone(),
                                received_at: Utc::now(),
                                summary: summarize_snapshot(&data),
                                data,
                            };
                            let _ = tx.send(line);
                        },
                        cancel,
                    )
                    .await;
            }
        });

        let deadline = args
            .duration
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut watch = facade.watch();
        let mut last = facade.status();
        format.write_line(writer, &status_line(last))?;

        let mut seen = 0usize;
        while args.limit.is_none_or(|limit| seen < limit) {
            tokio::select! {
                line = rx.recv() => {
                    let Some(line) = line else { break };
                    format.write_line(writer, &line)?;
                    seen += 1;
                }
                () = watch.changed() => {
                    let status = facade.status();
                    if status != last {
                        info!(status = %status.status, polling = status.should_poll(), "live status changed");
                        format.write_line(writer, &status_line(status))?;
                        last = status;
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "failed to listen for ctrl-c");
                    }
                    info!("interrupted");
                    break;
                }
                () = until(deadline) => {
                    debug!("duration elapsed");
                    break;
                }
            }
        }

        cancel.cancel();
        subscription.unsubscribe();
        provider.shutdown();
        if let Err(e) = poll_task.await {
            warn!(error = %e, "poller task failed");
        }
        Ok(())
    }
}

fn status_line(status: FacadeStatus) -> StatusLine {
    StatusLine {
        status: status.status,
        polling: status.should_poll(),
    }
}

/// Events without an API (e.g. headline stats) always pass the filter.
fn matches_filter(filter: Option<&str>, event: &ChannelEvent) -> bool {
    match (filter, event.api_id()) {
        (Some(wanted), Some(api)) => wanted == api,
        _ => true,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Summary for a polled REST document.
fn summarize_snapshot(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::Array(items) => format!("{} items", items.len()),
        serde_json::Value::Object(fields) => format!("snapshot ({} fields)", fields.len()),
        other => other.to_string(),
    }
}
