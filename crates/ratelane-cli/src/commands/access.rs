//! Plan access check.

use std::io::Write;

use ratelane_live::AccessGate;

use crate::cli::AccessArgs;
use crate::error::CliError;
use crate::output::{AccessReport, OutputFormat};

/// Access command executor.
pub struct AccessCommand {
    gate: AccessGate,
}

impl AccessCommand {
    /// Create an access command over `gate`.
    #[must_use]
    pub const fn new(gate: AccessGate) -> Self {
        Self { gate }
    }

    /// Execute the access command.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &AccessArgs,
    ) -> Result<(), CliError> {
        let report = self.report(args);
        format.write(writer, &report)?;
        Ok(())
    }

    /// Build the report without writing it.
    #[must_use]
    pub fn report(&self, args: &AccessArgs) -> AccessReport {
        AccessReport {
            channel: args.channel.clone(),
            plan: args.plan,
            required: self.gate.requirement(&args.channel),
            has_access: self.gate.allows(Some(args.plan), &args.channel),
        }
    }
}
