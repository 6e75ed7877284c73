//! Scoped line sources: the source is closed exactly once on every exit path.

use super::{
    errors::{Error, ResourceAccessError},
    parse::require_non_blank,
};
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use tracing::{debug, warn};

pub const COMMENT_MARKER: char = '#';

/// A readable-until-exhausted, closable sequence of lines.
pub trait LineSource {
    /// Next line, or `None` once the source is exhausted.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    fn close(&mut self) -> io::Result<()>;
}

impl<S: LineSource + ?Sized> LineSource for &mut S {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        (**self).read_line()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Closes the source on drop unless [`CloseGuard::close`] already did.
struct CloseGuard<S: LineSource> {
    source: S,
    closed: bool,
}

impl<S: LineSource> CloseGuard<S> {
    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.source.close()
    }
}

impl<S: LineSource> Drop for CloseGuard<S> {
    fn drop(&mut self) {
        // only reached while unwinding out of the body
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.source.close() {
                warn!(error = %e, "close failed while unwinding");
            }
        }
    }
}

/// Runs `body` against `source`, then closes it.
///
/// A body failure takes precedence over a close failure; the close is still
/// attempted. A panic in `body` closes the source before unwinding further.
pub fn with_resource<S, T, F>(source: S, body: F) -> Result<T, ResourceAccessError>
where
    S: LineSource,
    F: FnOnce(&mut S) -> io::Result<T>,
{
    let mut guard = CloseGuard { source, closed: false };
    let outcome = body(&mut guard.source);
    let closed = guard.close();

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(source)) => Err(ResourceAccessError::Close { source }),
        (Err(source), Ok(())) => Err(ResourceAccessError::Read { source }),
        (Err(source), Err(suppressed)) => {
            debug!(suppressed = %suppressed, "close failure suppressed by earlier read failure");
            Err(ResourceAccessError::Read { source })
        }
    }
}

/// Reads `source` to exhaustion and returns its trimmed lines, skipping blank
/// lines and lines starting with [`COMMENT_MARKER`].
pub fn read_lines<S: LineSource>(source: S) -> Result<Vec<String>, ResourceAccessError> {
    with_resource(source, |source| {
        let mut lines = Vec::new();
        while let Some(line) = source.read_line()? {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
                continue;
            }
            lines.push(trimmed.to_string());
        }
        Ok(lines)
    })
}

/// [`LineSource`] over any buffered reader.
pub struct BufReadSource<R> {
    reader: Option<R>,
}

impl<R: BufRead> BufReadSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: Some(reader) }
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "line source already closed"));
        };
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let content_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(content_len);
        Ok(Some(line))
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

pub fn open_runbook(path: impl AsRef<Path>) -> Result<BufReadSource<BufReader<File>>, ResourceAccessError> {
    let path = path.as_ref();
    File::open(path)
        .map(|file| BufReadSource::new(BufReader::new(file)))
        .map_err(|source| ResourceAccessError::Open {
            target: path.display().to_string(),
            source,
        })
}

/// Looks up the runbook step for `service_id` and returns it trimmed.
pub fn load_runbook_step(runbook_by_service: &HashMap<String, String>, service_id: &str) -> Result<String, Error> {
    let service = require_non_blank(Some(service_id), "serviceId")?;
    match runbook_by_service.get(service).map(|step| step.trim()) {
        Some(step) if !step.is_empty() => Ok(step.to_string()),
        _ => Err(ResourceAccessError::Missing { key: service.to_string() }.into()),
    }
}
