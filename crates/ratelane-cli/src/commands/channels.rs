//! Channel requirement table.

use std::io::Write;

use ratelane_live::AccessGate;

use crate::error::CliError;
use crate::output::{ChannelList, ChannelRow, OutputFormat};

/// Channels command executor.
pub struct ChannelsCommand {
    gate: AccessGate,
}

impl ChannelsCommand {
    /// Create a channels command over `gate`.
    #[must_use]
    pub const fn new(gate: AccessGate) -> Self {
        Self { gate }
    }

    /// Execute the channels command.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let list = ChannelList {
            channels: self
                .gate
                .table()
                .into_iter()
                .map(|(channel, required)| ChannelRow { channel, required })
                .collect(),
        };
        format.write(writer, &list)?;
        Ok(())
    }
}
