//! File-operation surface over a [`MigrationSession`].
//!
//! `read_raw`/`write_raw` follow the character-device convention: a byte
//! count on success, a negative errno on failure. [`StreamReader`] and
//! [`StreamWriter`] adapt a session to `std::io` for tooling, staging
//! headers internally so callers may slice the stream arbitrarily.

use std::io;

use gpumig_core::wire::HEADER_SIZE;

use crate::device::MigrationDevice;
use crate::error::{MigrationError, Result};
use crate::session::MigrationSession;

/// Save-direction read. Returns bytes copied, 0 at end of stream, or a
/// negative errno.
pub fn read_raw<D: MigrationDevice>(session: &mut MigrationSession<D>, buf: &mut [u8]) -> isize {
    match session.read(buf) {
        Ok(n) => n as isize,
        Err(e) => e.errno(),
    }
}

/// Resume-direction write. Returns bytes consumed or a negative errno.
pub fn write_raw<D: MigrationDevice>(session: &mut MigrationSession<D>, buf: &[u8]) -> isize {
    match session.write(buf) {
        Ok(n) => n as isize,
        Err(e) => e.errno(),
    }
}

fn io_error(e: MigrationError) -> io::Error {
    let kind = match &e {
        MigrationError::ShortBuffer { .. } | MigrationError::Config(_) => {
            io::ErrorKind::InvalidInput
        }
        MigrationError::OutOfMemory { .. } => io::ErrorKind::OutOfMemory,
        MigrationError::UnsupportedType(_) | MigrationError::ProtocolMismatch(_) => {
            io::ErrorKind::InvalidData
        }
        MigrationError::Aborted => io::ErrorKind::BrokenPipe,
        MigrationError::SizeQueryFailed { .. } | MigrationError::DeviceOperationFailed { .. } => {
            io::ErrorKind::Other
        }
    };
    io::Error::new(kind, e)
}

/// Header bytes held back because the caller's slice could not carry a
/// whole header.
#[derive(Debug)]
struct Stash {
    buf: [u8; HEADER_SIZE],
    pos: usize,
    len: usize,
}

impl Stash {
    fn new() -> Self {
        Self {
            buf: [0; HEADER_SIZE],
            pos: 0,
            len: 0,
        }
    }

    fn pending(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    fn is_empty(&self) -> bool {
        self.pos == self.len
    }

    fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

/// `io::Read` over the save side of a session.
pub struct StreamReader<'a, D> {
    session: &'a mut MigrationSession<D>,
    stash: Stash,
}

impl<'a, D: MigrationDevice> StreamReader<'a, D> {
    pub fn new(session: &'a mut MigrationSession<D>) -> Self {
        Self {
            session,
            stash: Stash::new(),
        }
    }
}

impl<D: MigrationDevice> io::Read for StreamReader<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.stash.is_empty() {
            match self.session.read(buf) {
                Err(MigrationError::ShortBuffer { .. }) => {
                    let n = self.session.read(&mut self.stash.buf).map_err(io_error)?;
                    self.stash.pos = 0;
                    self.stash.len = n;
                }
                other => return other.map_err(io_error),
            }
        }
        let pending = self.stash.pending();
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        self.stash.pos += n;
        Ok(n)
    }
}

/// `io::Write` over the resume side of a session.
///
/// Call [`finish`](Self::finish) once the source is exhausted to check the
/// stream ended on an item boundary.
pub struct StreamWriter<'a, D> {
    session: &'a mut MigrationSession<D>,
    stash: Stash,
}

impl<'a, D: MigrationDevice> StreamWriter<'a, D> {
    pub fn new(session: &'a mut MigrationSession<D>) -> Self {
        Self {
            session,
            stash: Stash::new(),
        }
    }

    pub fn finish(self) -> Result<()> {
        if self.stash.len > 0 {
            return Err(MigrationError::ShortBuffer {
                needed: HEADER_SIZE,
                got: self.stash.len,
            });
        }
        self.session.finish_resume()
    }
}

impl<D: MigrationDevice> io::Write for StreamWriter<'_, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let at_header = !self.session.resume_in_progress();
        if at_header && (self.stash.len > 0 || buf.len() < HEADER_SIZE) {
            let take = (HEADER_SIZE - self.stash.len).min(buf.len());
            let len = self.stash.len;
            self.stash.buf[len..len + take].copy_from_slice(&buf[..take]);
            self.stash.len += take;
            if self.stash.len < HEADER_SIZE {
                return Ok(take);
            }
            let header = self.stash.buf;
            self.stash.clear();
            self.session.write(&header).map_err(io_error)?;
            return Ok(take);
        }
        self.session.write(buf).map_err(io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
