//! Arrow IPC serialization of result batches.
//!
//! Every batch is written as a self-contained IPC stream (schema included)
//! so callers can retrieve and decode any offset independently and out of
//! order.

use std::io::Cursor;

use arrow::error::ArrowError;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

/// Serialize one batch to a self-contained IPC buffer.
pub fn encode_batch(batch: &RecordBatch) -> Result<Vec<u8>, ArrowError> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, batch.schema().as_ref())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

/// Decode an IPC buffer produced by [`encode_batch`].
pub fn decode_batches(bytes: &[u8]) -> Result<Vec<RecordBatch>, ArrowError> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    reader.collect()
}
