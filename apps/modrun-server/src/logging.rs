//! Logging bootstrap: human console output plus an optional rotating JSON
//! file sink.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate, compression::Compression};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

#[derive(Clone)]
struct RotWriterHandle(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock failed: {e}")))?
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock failed: {e}")))?
            .flush()
    }
}

fn file_writer(cfg: &LoggingConfig, base_dir: &Path) -> Option<RotWriter> {
    if cfg.file.is_empty() {
        return None;
    }
    let path = Path::new(&cfg.file);
    let log_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    if let Some(parent) = log_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("failed to create log directory {}: {e}", parent.display());
        return None;
    }

    let max_bytes = usize::try_from(cfg.max_size_mb.saturating_mul(1024 * 1024))
        .unwrap_or(100 * 1024 * 1024);
    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(cfg.max_backups)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Some(RotWriter(Arc::new(Mutex::new(rot))))
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over the
/// configured console level.
pub fn init(cfg: &LoggingConfig, base_dir: &Path) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.console_level));
    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file_layer = file_writer(cfg, base_dir).map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .with_filter(EnvFilter::new(&cfg.file_level))
    });

    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
