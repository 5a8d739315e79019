// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event formatter for the agent's own diagnostics.
//!
//! ```text
//! BEACON | INFO | Discovery context created for calculator (pid 4242) on 239.0.0.1:14000
//! BEACON | DEBUG | collector{records=3}: Collected remote log records
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::{LookupSpan, Scope};

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "BEACON | {} | ", event.metadata().level())?;
        if let Some(scope) = ctx.event_scope() {
            write_span_chain::<S, N>(&mut writer, scope)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// `outer{fields}: inner: ` from the root span down.
fn write_span_chain<'a, S, N>(writer: &mut format::Writer<'_>, scope: Scope<'a, S>) -> fmt::Result
where
    S: LookupSpan<'a>,
    N: for<'w> FormatFields<'w> + 'static,
{
    for span in scope.from_root() {
        let extensions = span.extensions();
        match extensions
            .get::<FormattedFields<N>>()
            .filter(|fields| !fields.is_empty())
        {
            Some(fields) => write!(writer, "{}{{{}}}: ", span.name(), fields)?,
            None => write!(writer, "{}: ", span.name())?,
        }
    }
    Ok(())
}
