//! Chrome trace output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Event<'a> {
    name: &'a str,
    /// Track to draw the event on.
    tid: usize,
    start: Instant,
    end: Instant,
}

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            event.name,
            event.start.saturating_duration_since(self.start).as_micros(),
            event.end.saturating_duration_since(event.start).as_micros()
        )
    }

    fn write(&mut self, event: &Event) -> std::io::Result<()> {
        self.write_event(event)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let end = Instant::now();
        self.write_event(&Event {
            name: "main",
            tid: 0,
            start: self.start,
            end,
        })?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn with_trace(f: impl FnOnce(&mut Trace) -> std::io::Result<()>) {
    let mut guard = match TRACE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(trace) = guard.as_mut() {
        if let Err(err) = f(trace) {
            tracing::warn!("trace write failed: {}", err);
            *guard = None;
        }
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    let mut guard = match TRACE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(trace);
    Ok(())
}

/// Runs `f`, recording it as a span if tracing is on.
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    with_trace(|t| {
        t.write(&Event {
            name,
            tid: 0,
            start,
            end,
        })
    });
    result
}

/// Records a job that ran on task track `tid`.
pub fn job_span(name: &str, tid: usize, span: (Instant, Instant)) {
    with_trace(|t| {
        t.write(&Event {
            name,
            // Track 0 is the driver itself.
            tid: tid + 1,
            start: span.0,
            end: span.1,
        })
    });
}

pub fn close() -> std::io::Result<()> {
    let mut guard = match TRACE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(mut t) = guard.take() {
        return t.close();
    }
    Ok(())
}
