//! Concrete handle streams
//!
//! The core defines the handle abstraction; this module supplies the
//! streams behind it: files, strings, and the three std handles.  File
//! handles rely on the heap's finalizer pass — an unreachable open file
//! is closed before its slot is reused — which the std handles opt out
//! of via the `STDIO` flag.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use skiff_core::heap::Object;
use skiff_core::{strings, Handle, HandleError, HandleFlags, HandleStream, Whence, Word};

use crate::unwind::{Unwind, VmResult};
use crate::vm::Machine;

// ---------------------------------------------------------------------
// streams

struct FileStream {
    file: Option<File>,
}

impl FileStream {
    fn file(&mut self) -> Result<&mut File, HandleError> {
        self.file.as_mut().ok_or(HandleError::Closed)
    }
}

impl HandleStream for FileStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        let mut buf = [0u8; 1];
        match self.file()?.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn putb(&mut self, b: u8) -> Result<(), HandleError> {
        self.file()?.write_all(&[b])?;
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        self.file()?.write_all(s.as_bytes())?;
        Ok(s.len())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        self.file()?.flush()?;
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, HandleError> {
        let from = match whence {
            Whence::Set => SeekFrom::Start(offset as u64),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(self.file()?.seek(from)?)
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        // dropping the File releases the descriptor
        self.file.take().ok_or(HandleError::Closed)?;
        Ok(())
    }
}

struct StringInputStream {
    bytes: Vec<u8>,
    pos: usize,
}

impl HandleStream for StringInputStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        match self.bytes.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn putb(&mut self, _b: u8) -> Result<(), HandleError> {
        Err(HandleError::NotWritable)
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, HandleError> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => self.pos as i64,
            Whence::End => self.bytes.len() as i64,
        };
        let target = base + offset;
        if target < 0 || target as usize > self.bytes.len() {
            return Err(HandleError::NotSeekable);
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        Ok(())
    }
}

struct StringOutputStream {
    buffer: String,
}

impl HandleStream for StringOutputStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        Err(HandleError::NotReadable)
    }

    fn putb(&mut self, b: u8) -> Result<(), HandleError> {
        self.buffer.push(b as char);
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        self.buffer.push_str(s);
        Ok(s.len())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn output_string(&self) -> Option<&str> {
        Some(&self.buffer)
    }
}

struct StdinStream;

impl HandleStream for StdinStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        let mut buf = [0u8; 1];
        match io::stdin().read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn putb(&mut self, _b: u8) -> Result<(), HandleError> {
        Err(HandleError::NotWritable)
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        Ok(())
    }
}

struct StdoutStream;

impl HandleStream for StdoutStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        Err(HandleError::NotReadable)
    }

    fn putb(&mut self, b: u8) -> Result<(), HandleError> {
        io::stdout().write_all(&[b])?;
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        io::stdout().write_all(s.as_bytes())?;
        Ok(s.len())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        io::stdout().flush()?;
        Ok(())
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        Ok(())
    }
}

struct StderrStream;

impl HandleStream for StderrStream {
    fn getb(&mut self) -> Result<Option<u8>, HandleError> {
        Err(HandleError::NotReadable)
    }

    fn putb(&mut self, b: u8) -> Result<(), HandleError> {
        io::stderr().write_all(&[b])?;
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<usize, HandleError> {
        io::stderr().write_all(s.as_bytes())?;
        Ok(s.len())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        io::stderr().flush()?;
        Ok(())
    }

    fn close_stream(&mut self) -> Result<(), HandleError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// construction

pub fn install_std_handles(m: &mut Machine) {
    let mut in_flags = HandleFlags::READ | HandleFlags::STDIO;
    if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
        in_flags |= HandleFlags::INTERACTIVE;
    }
    let stdin = Handle::new("*stdin*", in_flags, Box::new(StdinStream));
    m.thread.input_handle = m.heap.alloc(Object::Handle(stdin));

    let stdout = Handle::new(
        "*stdout*",
        HandleFlags::WRITE | HandleFlags::STDIO,
        Box::new(StdoutStream),
    );
    m.thread.output_handle = m.heap.alloc(Object::Handle(stdout));

    let stderr = Handle::new(
        "*stderr*",
        HandleFlags::WRITE | HandleFlags::STDIO,
        Box::new(StderrStream),
    );
    m.thread.error_handle = m.heap.alloc(Object::Handle(stderr));
}

/// Open a file handle; `mode` is one of `r`, `w`, `a`, `r+`, `w+`, `x`.
pub fn open_file_handle(m: &mut Machine, path: &str, mode: &str) -> VmResult<Word> {
    if path.is_empty() || path.contains('\0') {
        let ty = m.conditions.io_malformed_filename_error;
        return Err(raise_filename_error(m, ty, "malformed filename", path));
    }

    let mut opts = OpenOptions::new();
    let flags = match mode {
        "r" => {
            opts.read(true);
            HandleFlags::READ
        }
        "w" => {
            opts.write(true).create(true).truncate(true);
            HandleFlags::WRITE
        }
        "a" => {
            opts.append(true).create(true);
            HandleFlags::WRITE
        }
        "r+" => {
            opts.read(true).write(true);
            HandleFlags::READ | HandleFlags::WRITE
        }
        "w+" => {
            opts.read(true).write(true).create(true).truncate(true);
            HandleFlags::READ | HandleFlags::WRITE
        }
        // exclusive create
        "x" => {
            opts.write(true).create_new(true);
            HandleFlags::WRITE
        }
        _ => {
            return Err(m.error_param_type("file mode", Word::NIL));
        }
    };

    match opts.open(path) {
        Ok(file) => {
            let h = Handle::new(path, flags | HandleFlags::FILE, Box::new(FileStream {
                file: Some(file),
            }));
            Ok(m.heap.alloc(Object::Handle(h)))
        }
        Err(e) => {
            let (ty, msg) = match e.kind() {
                io::ErrorKind::NotFound => (m.conditions.io_no_such_file_error, "no such file"),
                io::ErrorKind::PermissionDenied => {
                    (m.conditions.io_file_protection_error, "permission denied")
                }
                io::ErrorKind::AlreadyExists => {
                    (m.conditions.io_file_already_exists_error, "file already exists")
                }
                _ => (m.conditions.io_filename_error, "open failed"),
            };
            Err(raise_filename_error(m, ty, msg, path))
        }
    }
}

fn raise_filename_error(m: &mut Machine, ty: Word, msg: &str, path: &str) -> Unwind {
    let filename = strings::alloc(&mut m.heap, path);
    let c = m.make_condition(ty, msg, path, &[filename]);
    m.raise_error(c)
}

pub fn open_input_string(m: &mut Machine, text: &str) -> Word {
    let h = Handle::new(
        "*input-string*",
        HandleFlags::READ | HandleFlags::STRING,
        Box::new(StringInputStream {
            bytes: text.as_bytes().to_vec(),
            pos: 0,
        }),
    );
    m.heap.alloc(Object::Handle(h))
}

pub fn open_output_string(m: &mut Machine) -> Word {
    let h = Handle::new(
        "*output-string*",
        HandleFlags::WRITE | HandleFlags::STRING,
        Box::new(StringOutputStream {
            buffer: String::new(),
        }),
    );
    m.heap.alloc(Object::Handle(h))
}

// ---------------------------------------------------------------------
// operations (error mapping onto the condition types)

fn with_handle<T>(
    m: &mut Machine,
    hw: Word,
    f: impl FnOnce(&mut Handle) -> Result<T, HandleError>,
) -> VmResult<T> {
    if !matches!(m.heap.try_get(hw), Some(Object::Handle(_))) {
        return Err(m.error_param_type("handle", hw));
    }
    let r = match m.heap.get_mut(hw) {
        Object::Handle(h) => f(h),
        _ => unreachable!(),
    };
    r.map_err(|e| raise_handle_error(m, hw, e))
}

fn raise_handle_error(m: &mut Machine, hw: Word, e: HandleError) -> Unwind {
    let (ty, msg) = match &e {
        HandleError::Closed => (m.conditions.io_closed_handle_error, "handle already closed"),
        HandleError::NotReadable => (m.conditions.io_handle_error, "handle not readable"),
        HandleError::NotWritable => (m.conditions.io_handle_error, "handle not writable"),
        HandleError::NotSeekable => (m.conditions.io_handle_error, "handle not seekable"),
        HandleError::Io(_) => (m.conditions.io_error, "i/o error"),
    };
    let detail = e.to_string();
    let c = m.make_condition(ty, msg, &detail, &[hw]);
    m.raise_error(c)
}

pub fn puts(m: &mut Machine, hw: Word, s: &str) -> VmResult<usize> {
    with_handle(m, hw, |h| h.puts(s))
}

/// Write without the condition machinery — for the base condition
/// handlers, which must never raise while reporting.
pub fn puts_best_effort(m: &mut Machine, hw: Word, s: &str) {
    if let Some(Object::Handle(_)) = m.heap.try_get(hw)
        && let Object::Handle(h) = m.heap.get_mut(hw)
    {
        let _ = h.puts(s);
        let _ = h.flush();
    }
}

pub fn putb(m: &mut Machine, hw: Word, b: u8) -> VmResult<()> {
    with_handle(m, hw, |h| h.putb(b))
}

pub fn getb(m: &mut Machine, hw: Word) -> VmResult<Option<u8>> {
    with_handle(m, hw, |h| h.getb())
}

pub fn flush(m: &mut Machine, hw: Word) -> VmResult<()> {
    with_handle(m, hw, |h| h.flush())
}

pub fn close(m: &mut Machine, hw: Word) -> VmResult<()> {
    with_handle(m, hw, |h| h.close())
}

pub fn seek(m: &mut Machine, hw: Word, offset: i64, whence: Whence) -> VmResult<u64> {
    with_handle(m, hw, |h| h.seek(offset, whence))
}

pub fn readyp(m: &mut Machine, hw: Word) -> VmResult<bool> {
    with_handle(m, hw, |h| h.readyp())
}

pub fn at_eof(m: &Machine, hw: Word) -> bool {
    matches!(m.heap.try_get(hw), Some(Object::Handle(h)) if h.at_eof())
}

/// The accumulated text of a string output handle, as a string value.
pub fn get_output_string(m: &mut Machine, hw: Word) -> VmResult<Word> {
    let text = match m.heap.try_get(hw) {
        Some(Object::Handle(h)) => h.output_string().map(str::to_string),
        _ => None,
    };
    match text {
        Some(t) => Ok(strings::alloc(&mut m.heap, t)),
        None => Err(m.error_param_type("string output handle", hw)),
    }
}
