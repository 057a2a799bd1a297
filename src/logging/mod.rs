use crate::config::EnvConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Calling it again is a no-op.
#[cfg(target_arch = "wasm32")]
pub(crate) fn init_logging(cfg: &EnvConfig) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(ConsoleMakeWriter)
        .without_time()
        .with_target(false)
        .try_init();
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn init_logging(cfg: &EnvConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Routes formatted lines to the browser console.
#[cfg(target_arch = "wasm32")]
struct ConsoleMakeWriter;

#[cfg(target_arch = "wasm32")]
#[derive(Default)]
struct ConsoleWriter {
    buf: Vec<u8>,
}

#[cfg(target_arch = "wasm32")]
impl std::io::Write for ConsoleWriter {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// The fmt layer creates one writer per event, so a line is emitted on drop.
#[cfg(target_arch = "wasm32")]
impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if !line.is_empty() {
            web_sys::console::log_1(&line.into());
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter::default()
    }
}
