use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Starts named spans around dispatched calls
pub trait Tracer: Send + Sync + 'static {
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan>;
}

/// An open span; ends when dropped
pub trait TraceSpan: Send {
    fn record_error(&mut self, error: &(dyn StdError + 'static));

    /// The `tracing` span the traced call is instrumented with
    fn span(&self) -> tracing::Span {
        tracing::Span::none()
    }
}

// ============================================================================
// Noop
// ============================================================================

#[derive(Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> Box<dyn TraceSpan> {
        Box::new(NoopSpan)
    }
}

impl TraceSpan for NoopSpan {
    fn record_error(&mut self, _error: &(dyn StdError + 'static)) {}
}

// ============================================================================
// tracing
// ============================================================================

/// Emits one `tracing` span per call; the call itself and its error
/// events run inside it
#[derive(Default)]
pub struct LogTracer;

struct LogSpan {
    span: tracing::Span,
    started: Instant,
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan> {
        Box::new(LogSpan {
            span: tracing::info_span!("kv_call", span_name = %name),
            started: Instant::now(),
        })
    }
}

impl TraceSpan for LogSpan {
    fn record_error(&mut self, error: &(dyn StdError + 'static)) {
        let chain = error_chain(error);
        self.span
            .in_scope(|| tracing::error!(error = %chain, "call failed"));
    }

    fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

impl Drop for LogSpan {
    fn drop(&mut self) {
        let elapsed_ms = elapsed_ms(self.started);
        self.span
            .in_scope(|| tracing::debug!(elapsed_ms, "call finished"));
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// A span that has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub name: String,
    pub errors: Vec<String>,
}

/// Keeps every finished span, in the order they ended
#[derive(Default, Clone)]
pub struct InMemoryTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

struct InMemorySpan {
    name: String,
    errors: Vec<String>,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.finished
            .lock()
            .iter()
            .filter(|span| span.name == name)
            .count()
    }

    pub fn clear(&self) {
        self.finished.lock().clear();
    }
}

impl Tracer for InMemoryTracer {
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan> {
        Box::new(InMemorySpan {
            name: name.to_string(),
            errors: Vec::new(),
            sink: self.finished.clone(),
        })
    }
}

impl TraceSpan for InMemorySpan {
    fn record_error(&mut self, error: &(dyn StdError + 'static)) {
        self.errors.push(error_chain(error));
    }
}

impl Drop for InMemorySpan {
    fn drop(&mut self) {
        self.sink.lock().push(FinishedSpan {
            name: std::mem::take(&mut self.name),
            errors: std::mem::take(&mut self.errors),
        });
    }
}

/// `outer: inner: root` rendering of an error and its sources
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Log output captured by a thread-local subscriber
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl LogCapture {
    /// Capture everything at `DEBUG` and above on this thread until the
    /// guard drops
    pub(crate) fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
