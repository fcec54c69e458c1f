//! The fetch, decode and report flow behind the `arrow-fetch` binary.

use std::{
    fmt,
    io::Write,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{ipc::ColumnarTable, request::RequestBuilder};

/// What one fetch measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub batches: usize,
    pub rows: usize,
    pub elapsed: Duration,
}

impl Report {
    pub fn new(table: &ColumnarTable, elapsed: Duration) -> Self {
        Self {
            batches: table.num_batches(),
            rows: table.num_rows(),
            elapsed,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} record batches received", self.batches)?;
        write!(f, "{:.2} seconds elapsed", self.elapsed.as_secs_f64())
    }
}

/// Send `request`, decode the whole body as an Arrow stream and time it.
///
/// The clock starts before the connection is opened and stops once the last
/// batch has been decoded.
pub async fn fetch_table(request: RequestBuilder) -> crate::Result<(ColumnarTable, Duration)> {
    let start = Instant::now();
    let table = request
        .send()
        .await?
        .error_for_status()?
        .arrow_table()
        .await?;
    Ok((table, start.elapsed()))
}

/// Fetch, then write the two report lines to `out`.
///
/// Nothing is written when the request or the decode fails.
pub async fn fetch_and_report<W: Write>(
    request: RequestBuilder,
    out: &mut W,
) -> crate::Result<Report> {
    let (table, elapsed) = fetch_table(request).await?;
    let report = Report::new(&table, elapsed);
    info!(
        batches = report.batches,
        rows = report.rows,
        elapsed = ?report.elapsed,
        "arrow stream decoded"
    );
    drop(table);

    writeln!(out, "{report}")?;
    out.flush()?;
    Ok(report)
}
