//! Copies a child's output stream into its log file, line by line.

use crate::{LogCollector, LogDateFormat, LogEntry, LogSource, LogWriter};
use chrono::{Local, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything a capture task needs besides the stream itself.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    pub name: String,
    pub instance: u32,
    pub source: LogSource,
    pub writer: LogWriter,
    pub date_format: Option<LogDateFormat>,
    pub collector: Option<LogCollector>,
}

impl CaptureContext {
    fn render(&self, message: &str) -> String {
        match self.date_format {
            Some(ref format) => format!("{}: {}", format.format(&Local::now()), message),
            None => message.to_string(),
        }
    }
}

/// Spawn a task that drains `reader` until EOF.
///
/// Invalid UTF-8 is replaced rather than aborting capture, so the child
/// never blocks on a full pipe.
pub fn spawn_capture<R>(reader: R, context: CaptureContext) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let message = String::from_utf8_lossy(&buffer);
                    let message = message.trim_end_matches(['\n', '\r']);

                    if let Err(e) = context.writer.write_line(&context.render(message)).await {
                        warn!(
                            "Failed to write {} log for {}-{} to {}: {}",
                            context.source,
                            context.name,
                            context.instance,
                            context.writer.path().display(),
                            e
                        );
                    }

                    if let Some(ref collector) = context.collector {
                        collector.publish(LogEntry {
                            name: context.name.clone(),
                            instance: context.instance,
                            timestamp: Utc::now(),
                            source: context.source,
                            message: message.to_string(),
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Stopped capturing {} for {}-{}: {}",
                        context.source, context.name, context.instance, e
                    );
                    break;
                }
            }
        }

        debug!(
            "Capture finished for {}-{} ({})",
            context.name, context.instance, context.source
        );
    })
}
