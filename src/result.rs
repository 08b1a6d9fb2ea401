//! [`TableResult`] — the accumulator a single [`crate::batch_processor::BatchProcessor`]
//! run produces. One writer, append-only list fields, overwrite-on-update
//! scalar fields; no thread-safety is required since each table has exactly
//! one owning worker.

use serde::Serialize;

/// Summary of one table's processing run, returned by
/// [`crate::batch_processor::BatchProcessor::run`] and collected by
/// [`crate::supervisor::ProcessorSupervisor`].
#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    pub table: String,
    pub process_start_time: i64,
    pub process_start_watermark: i64,
    pub process_start_version: i64,
    pub manifest_records: i64,
    pub manifest_watermark: i64,
    pub process_finish_time: Option<i64>,
    pub process_finish_watermark: Option<i64>,
    pub process_finish_version: Option<i64>,
    pub watermarks: Vec<i64>,
    pub schema_timestamps: Vec<i64>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TableResult {
    pub fn new(
        table: impl Into<String>,
        process_start_time: i64,
        process_start_watermark: i64,
        process_start_version: i64,
        manifest_records: i64,
        manifest_watermark: i64,
    ) -> Self {
        TableResult {
            table: table.into(),
            process_start_time,
            process_start_watermark,
            process_start_version,
            manifest_records,
            manifest_watermark,
            process_finish_time: None,
            process_finish_watermark: None,
            process_finish_version: None,
            watermarks: Vec::new(),
            schema_timestamps: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn record_watermark(&mut self, watermark: i64) {
        self.watermarks.push(watermark);
    }

    pub fn record_schema_timestamp(&mut self, schema_timestamp: i64) {
        self.schema_timestamps.push(schema_timestamp);
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn finish(&mut self, finish_time: i64, watermark: i64, version: i64) {
        self.process_finish_time = Some(finish_time);
        self.process_finish_watermark = Some(watermark);
        self.process_finish_version = Some(version);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_watermarks_and_schema_timestamps_in_order() {
        let mut r = TableResult::new("orders", 0, 0, -1, 100, 800);
        r.record_schema_timestamp(500);
        r.record_watermark(600);
        r.record_watermark(700);
        r.finish(1, 700, 2);

        assert_eq!(r.watermarks, vec![600, 700]);
        assert_eq!(r.schema_timestamps, vec![500]);
        assert_eq!(r.process_finish_watermark, Some(700));
        assert!(!r.has_errors());
    }

    #[test]
    fn errors_are_tracked_independent_of_warnings() {
        let mut r = TableResult::new("orders", 0, -1, -1, 0, 0);
        r.record_error("corrupt state");
        r.record_warning("nothing new");
        assert!(r.has_errors());
        assert_eq!(r.warnings.len(), 1);
    }
}
