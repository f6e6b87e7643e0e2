//! I/O handles
//!
//! A handle is the VM's only view of a byte stream.  The original method
//! table (free, ready?, getb, eof?, close, putb, puts, flush, seek, print)
//! becomes the [`HandleStream`] trait; concrete file/pipe/string streams
//! live with the runtime, the std handles are flagged `STDIO`.
//!
//! Pipe handles are not seekable.  Flushing an input stream discards its
//! buffer, flushing an output stream writes it.  `close` flushes first;
//! closing an already-closed handle is an error the runtime raises as
//! `^i/o-closed-handle-error`.

use std::fmt;
use std::io;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const CLOSED      = 1 << 2;
        const FILE        = 1 << 3;
        const PIPE        = 1 << 4;
        const STRING      = 1 << 5;
        const STDIO       = 1 << 6;
        const INTERACTIVE = 1 << 7;
        const CLOEXEC     = 1 << 8;
        const EOF         = 1 << 9;
    }
}

#[derive(Debug)]
pub enum HandleError {
    Closed,
    NotReadable,
    NotWritable,
    NotSeekable,
    Io(io::Error),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Closed => write!(f, "handle already closed"),
            HandleError::NotReadable => write!(f, "handle not open for reading"),
            HandleError::NotWritable => write!(f, "handle not open for writing"),
            HandleError::NotSeekable => write!(f, "handle not seekable"),
            HandleError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<io::Error> for HandleError {
    fn from(e: io::Error) -> Self {
        HandleError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// The stream half of a handle: what the original kept in the per-type
/// method table.
pub trait HandleStream {
    fn readyp(&mut self) -> Result<bool, HandleError> {
        Ok(true)
    }
    /// Read one byte; `None` is end of stream.
    fn getb(&mut self) -> Result<Option<u8>, HandleError>;
    fn putb(&mut self, b: u8) -> Result<(), HandleError>;
    fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        for b in s.bytes() {
            self.putb(b)?;
        }
        Ok(s.len())
    }
    fn flush(&mut self) -> Result<(), HandleError>;
    fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64, HandleError> {
        Err(HandleError::NotSeekable)
    }
    /// Release the underlying resource.  Called at most once.
    fn close_stream(&mut self) -> Result<(), HandleError>;
    /// String output streams expose their accumulated text.
    fn output_string(&self) -> Option<&str> {
        None
    }
}

pub struct Handle {
    pub flags: HandleFlags,
    pub name: String,
    /// byte position, 0+
    pub pos: u64,
    /// line number, 1+
    pub line: u64,
    /// one byte of pushback
    pub lookahead: Option<u8>,
    stream: Box<dyn HandleStream>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("pos", &self.pos)
            .field("line", &self.line)
            .finish()
    }
}

impl Handle {
    pub fn new(name: impl Into<String>, flags: HandleFlags, stream: Box<dyn HandleStream>) -> Handle {
        Handle {
            flags,
            name: name.into(),
            pos: 0,
            line: 1,
            lookahead: None,
            stream,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.flags.contains(HandleFlags::CLOSED)
    }

    pub fn at_eof(&self) -> bool {
        self.flags.contains(HandleFlags::EOF)
    }

    pub fn readyp(&mut self) -> Result<bool, HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if self.lookahead.is_some() {
            return Ok(true);
        }
        self.stream.readyp()
    }

    pub fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if !self.flags.contains(HandleFlags::READ) {
            return Err(HandleError::NotReadable);
        }
        let b = match self.lookahead.take() {
            Some(b) => Some(b),
            None => self.stream.getb()?,
        };
        match b {
            Some(b) => {
                self.pos += 1;
                if b == b'\n' {
                    self.line += 1;
                }
                Ok(Some(b))
            }
            None => {
                self.flags |= HandleFlags::EOF;
                Ok(None)
            }
        }
    }

    pub fn ungetb(&mut self, b: u8) {
        debug_assert!(self.lookahead.is_none(), "double pushback on {}", self.name);
        self.lookahead = Some(b);
        self.pos = self.pos.saturating_sub(1);
    }

    pub fn putb(&mut self, b: u8) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if !self.flags.contains(HandleFlags::WRITE) {
            return Err(HandleError::NotWritable);
        }
        self.stream.putb(b)?;
        self.pos += 1;
        Ok(())
    }

    pub fn putc(&mut self, c: char) -> Result<(), HandleError> {
        let mut buf = [0u8; 4];
        self.puts(c.encode_utf8(&mut buf))?;
        Ok(())
    }

    pub fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if !self.flags.contains(HandleFlags::WRITE) {
            return Err(HandleError::NotWritable);
        }
        let n = self.stream.puts(s)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub fn flush(&mut self) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if !self.flags.contains(HandleFlags::WRITE) {
            // input side: discard the pushback buffer
            self.lookahead = None;
            return Ok(());
        }
        self.stream.flush()
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if self.flags.contains(HandleFlags::PIPE) {
            return Err(HandleError::NotSeekable);
        }
        self.lookahead = None;
        self.flags.remove(HandleFlags::EOF);
        let pos = self.stream.seek(offset, whence)?;
        self.pos = pos;
        Ok(pos)
    }

    /// Flush then release the stream.  A second close is an error.
    pub fn close(&mut self) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        if self.flags.contains(HandleFlags::WRITE) {
            let _ = self.stream.flush();
        }
        self.stream.close_stream()?;
        self.flags |= HandleFlags::CLOSED;
        Ok(())
    }

    /// The accumulated text of a string output handle.
    pub fn output_string(&self) -> Option<&str> {
        self.stream.output_string()
    }

    /// The GC's finalizer: close iff not already closed and not one of the
    /// std handles.  Returns whether anything was released.
    pub fn finalize(&mut self) -> bool {
        if self.is_closed() || self.flags.contains(HandleFlags::STDIO) {
            return false;
        }
        tracing::debug!(name = %self.name, "finalizing unreachable handle");
        self.close().is_ok()
    }
}
