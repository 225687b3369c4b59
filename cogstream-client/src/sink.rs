//! Destinations for measurement samples.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use cogstream_core::IntervalMeasurement;
use tracing::info;

use crate::config::MeasurementOutputConfig;

/// Header row written at the top of every CSV file.
pub const CSV_HEADER: &str = "source name,interval rtt ms,overall rtt ms,interval fps,overall fps";

pub trait MeasurementSink: Send {
    fn record(&mut self, sample: &IntervalMeasurement) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each sample to the log.
#[derive(Debug, Default)]
pub struct LogMeasurementSink;

impl MeasurementSink for LogMeasurementSink {
    fn record(&mut self, sample: &IntervalMeasurement) -> io::Result<()> {
        info!(
            source = %sample.source_name,
            interval_rtt_ms = millis(sample.interval_rtt),
            overall_rtt_ms = millis(sample.overall_rtt),
            interval_fps = sample.interval_fps,
            overall_fps = sample.overall_fps,
            "measurement"
        );
        Ok(())
    }
}

/// Appends one CSV row per sample.
#[derive(Debug)]
pub struct CsvMeasurementSink<W: Write> {
    out: W,
}

impl CsvMeasurementSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvMeasurementSink<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{CSV_HEADER}")?;
        Ok(Self { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> MeasurementSink for CsvMeasurementSink<W> {
    fn record(&mut self, sample: &IntervalMeasurement) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{:.3},{:.3},{:.3},{:.3}",
            escape(&sample.source_name),
            millis(sample.interval_rtt),
            millis(sample.overall_rtt),
            sample.interval_fps,
            sample.overall_fps,
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Build every sink enabled in `config`.
pub fn open_sinks(config: &MeasurementOutputConfig) -> io::Result<Vec<Box<dyn MeasurementSink>>> {
    let mut sinks: Vec<Box<dyn MeasurementSink>> = Vec::new();
    if config.log {
        sinks.push(Box::new(LogMeasurementSink));
    }
    if !config.csv_path.is_empty() {
        info!(path = %config.csv_path, "writing measurements as CSV");
        sinks.push(Box::new(CsvMeasurementSink::create(Path::new(&config.csv_path))?));
    }
    Ok(sinks)
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
