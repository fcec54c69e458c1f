//! Incremental decoding of Arrow IPC streams carried in HTTP bodies.

use std::{collections::VecDeque, sync::Arc};

use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::ipc::reader::StreamDecoder;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use tracing::trace;

use crate::response::Response;

/// Media type registered for the Arrow IPC stream format.
pub const ARROW_STREAM_MIME: &str = "application/vnd.apache.arrow.stream";

/// Feeds arbitrary byte chunks to an arrow [`StreamDecoder`].
///
/// Messages may straddle chunk boundaries; partial messages are buffered by
/// the decoder until the rest arrives.
pub struct StreamingDecoder {
    decoder: StreamDecoder,
    bytes: u64,
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self {
            decoder: StreamDecoder::new(),
            bytes: 0,
        }
    }

    /// Decode every complete message in `chunk`.
    pub fn push(&mut self, chunk: Bytes) -> crate::Result<Vec<RecordBatch>> {
        self.bytes += chunk.len() as u64;
        let mut buffer = Buffer::from(chunk);
        let mut batches = Vec::new();
        while !buffer.is_empty() {
            if let Some(batch) = self.decoder.decode(&mut buffer)? {
                trace!(rows = batch.num_rows(), "decoded record batch");
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    /// The stream schema, once its message has been decoded.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.decoder.schema()
    }

    /// Total bytes pushed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes
    }

    /// Signal end of input.
    ///
    /// Input with no bytes at all is an empty table with an empty schema.
    /// Fails if the input stopped in the middle of a message or never
    /// carried a schema.
    pub fn finish(&mut self) -> crate::Result<SchemaRef> {
        if self.bytes == 0 {
            return Ok(Arc::new(Schema::empty()));
        }
        self.decoder.finish()?;
        self.decoder.schema().ok_or(crate::Error::MissingSchema)
    }
}

/// An in-memory table: a schema plus the record batches that share it.
#[derive(Debug, Clone)]
pub struct ColumnarTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl ColumnarTable {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }
}

/// Pulls record batches out of a response body as the bytes arrive.
pub struct ArrowBatchReader {
    response: Response,
    decoder: StreamingDecoder,
    pending: VecDeque<RecordBatch>,
    schema: Option<SchemaRef>,
}

impl ArrowBatchReader {
    pub(crate) fn new(response: Response) -> Self {
        Self {
            response,
            decoder: StreamingDecoder::new(),
            pending: VecDeque::new(),
            schema: None,
        }
    }

    /// The stream schema, if it has been received yet.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone().or_else(|| self.decoder.schema())
    }

    /// Next decoded batch, or `None` once the stream has ended cleanly.
    pub async fn next_batch(&mut self) -> crate::Result<Option<RecordBatch>> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Ok(Some(batch));
            }
            if self.schema.is_some() {
                return Ok(None);
            }
            match self.response.chunk().await? {
                Some(chunk) => self.pending.extend(self.decoder.push(chunk)?),
                None => self.schema = Some(self.decoder.finish()?),
            }
        }
    }

    /// Drain the rest of the stream into a [`ColumnarTable`].
    pub async fn collect(mut self) -> crate::Result<ColumnarTable> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        let schema = self.schema.ok_or(crate::Error::MissingSchema)?;
        Ok(ColumnarTable::new(schema, batches))
    }
}
