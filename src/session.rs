use time::OffsetDateTime;

use crate::port::{PortHandle, ReadError};
use crate::render::{render, Line};

/// The one open connection. Owns its handle, so there can only ever be one
/// of these per handle and closing it consumes it.
pub struct Session<H: PortHandle> {
    pub device: String,
    pub opened_at: OffsetDateTime,
    handle: H,
}

impl<H: PortHandle> Session<H> {
    pub fn new(device: String, handle: H) -> Session<H> {
        Session {
            device,
            opened_at: OffsetDateTime::now_utc(),
            handle,
        }
    }

    /// Reads one line if anything is waiting. Ok(None) covers both "nothing
    /// available" and "read something that isn't worth printing".
    pub fn read_available(&mut self) -> Result<Option<Line>, ReadError> {
        if self.handle.bytes_to_read()? == 0 {
            return Ok(None);
        }
        let bytes = self.handle.read_line()?;
        log::trace!("{}: read {} bytes", self.device, bytes.len());
        Ok(render(&bytes))
    }

    /// Best effort: failures are logged and otherwise ignored.
    pub fn close(self) {
        if let Err(e) = self.handle.close() {
            log::debug!("ignoring error while closing {}: {e}", self.device);
        }
    }
}
