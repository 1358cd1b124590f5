use std::collections::HashMap;
use std::sync::Mutex;

/// Log line buffers, one lock per action instance.
///
/// The set of buffers is fixed at construction, so tailing one action never
/// contends with reads of another or with the status scan.
#[derive(Debug, Default)]
pub struct LogBuffers {
    buffers: HashMap<String, Mutex<Buffer>>,
}

#[derive(Debug, Default)]
struct Buffer {
    /// Latest full read of the log object
    lines: Vec<String>,
    /// Lines already handed out as new
    emitted: usize,
}

impl LogBuffers {
    pub fn new<'a>(instances: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            buffers: instances
                .into_iter()
                .map(|name| (name.to_string(), Mutex::new(Buffer::default())))
                .collect(),
        }
    }

    /// Copy of the lines read so far
    pub fn lines(&self, instance: &str) -> Vec<String> {
        self.buffers
            .get(instance)
            .map(|buffer| buffer.lock().unwrap().lines.clone())
            .unwrap_or_default()
    }

    /// Run `f` over the joined buffer text while holding only this buffer's lock
    pub fn with_text<R>(&self, instance: &str, f: impl FnOnce(&str) -> R) -> Option<R> {
        let buffer = self.buffers.get(instance)?;
        let buffer = buffer.lock().unwrap();
        Some(f(&buffer.lines.join("\n")))
    }

    /// Replace the buffer with a fresh read of the whole log object and
    /// return the lines not handed out before.
    ///
    /// A read can catch the writer mid-line, so the buffer always takes the
    /// latest read. Unless `complete` is set, the last line is held back from
    /// the returned lines until a later read shows it finished.
    pub fn update(&self, instance: &str, fetched: Vec<String>, complete: bool) -> Vec<String> {
        let Some(buffer) = self.buffers.get(instance) else {
            return Vec::new();
        };

        let mut buffer = buffer.lock().unwrap();
        let settled = if complete {
            fetched.len()
        } else {
            fetched.len().saturating_sub(1)
        };
        let fresh = fetched
            .get(buffer.emitted..settled)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        buffer.emitted = buffer.emitted.max(settled);
        buffer.lines = fetched;
        fresh
    }
}
