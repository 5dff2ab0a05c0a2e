use std::io::Write;
use crate::error::SinkError;
use crate::models::Record;

/// Receives parsed records in order, persisting each exactly once.
pub trait RecordSink {
    fn accept(&mut self, record: &Record) -> Result<(), SinkError>;
}

/// Writes one JSON object per record, for dry runs and piping into other tools.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink { out }
    }

    pub fn finish(mut self) -> Result<W, SinkError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn accept(&mut self, record: &Record) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: &Record) -> Result<(), SinkError> {
        self.push(record.clone());
        Ok(())
    }
}
