//! Line-oriented log sink for allocator events.
//!
//! A record may be emitted from deep inside an allocation path, so
//! nothing here is allowed to allocate: the sink file descriptor comes
//! from `libc::getenv`/`libc::open`, and records are formatted into a
//! bounded stack buffer.  The whole file is advisorily write-locked
//! around each record so lines from concurrent threads (and
//! cooperating processes sharing the sink) never interleave.
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicI32, Ordering};

/// Name of the environment variable holding the sink path.  The
/// (misspelled) name is preserved verbatim for compatibility.
pub const SINK_ENV_VAR: &str = "MSM_OUPUT";

const FD_UNSET: i32 = -1;
const FD_DISABLED: i32 = -2;

/// Upper bound on one formatted record, terminator included.
const RECORD_CAPACITY: usize = 1024;

static SINK_FD: AtomicI32 = AtomicI32::new(FD_UNSET);

/// Formats into a fixed stack buffer, silently truncating once full.
struct RecordBuf {
    bytes: [u8; RECORD_CAPACITY],
    len: usize,
}

impl RecordBuf {
    fn new() -> Self {
        RecordBuf {
            bytes: [0; RECORD_CAPACITY],
            len: 0,
        }
    }

    // Leave room for the trailing newline.
    fn capacity(&self) -> usize {
        RECORD_CAPACITY - 1
    }
}

impl Write for RecordBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.capacity() - self.len;
        let take = s.len().min(room);

        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

fn open_sink() -> i32 {
    let path = unsafe { libc::getenv(b"MSM_OUPUT\0".as_ptr() as *const libc::c_char) };
    if path.is_null() {
        return FD_DISABLED;
    }

    let fd = unsafe {
        libc::open(
            path,
            libc::O_CREAT | libc::O_WRONLY,
            0o666 as libc::c_uint,
        )
    };

    // An unopenable sink falls back to standard output.
    if fd == -1 {
        libc::STDOUT_FILENO
    } else {
        fd
    }
}

fn sink_fd() -> i32 {
    let fd = SINK_FD.load(Ordering::Acquire);
    if fd != FD_UNSET {
        return fd;
    }

    let opened = open_sink();
    match SINK_FD.compare_exchange(FD_UNSET, opened, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => opened,
        Err(raced) => {
            // Another thread opened the sink first; drop ours.
            if opened >= 0 && opened != libc::STDOUT_FILENO {
                unsafe { libc::close(opened) };
            }
            raced
        }
    }
}

/// Last-resort reporting when the sink itself fails: write a fixed
/// message to stderr and exit, without re-entering the journal.
fn bail(msg: &str) -> ! {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
    }
    std::process::exit(1);
}

fn write_all(fd: i32, bytes: &[u8]) {
    let mut written = 0;
    while written < bytes.len() {
        let ret = unsafe {
            libc::write(
                fd,
                bytes[written..].as_ptr() as *const libc::c_void,
                bytes.len() - written,
            )
        };

        if ret <= 0 {
            return;
        }

        written += ret as usize;
    }
}

fn whole_file_lock(kind: libc::c_short) -> libc::flock {
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };

    lock.l_type = kind;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = 0;
    lock.l_len = 0;
    lock
}

/// Emits one record to `fd`, newline-terminated, under an advisory
/// write lock on the whole file.
pub(crate) fn emit_to(fd: i32, args: fmt::Arguments) {
    if fd < 0 {
        return;
    }

    let mut record = RecordBuf::new();
    let _ = record.write_fmt(args);
    record.bytes[record.len] = b'\n';
    record.len += 1;

    let lock = whole_file_lock(libc::F_WRLCK as libc::c_short);
    if unsafe { libc::fcntl(fd, libc::F_SETLKW, &lock) } == -1 {
        bail("vigil: could not lock the log sink\n");
    }

    write_all(fd, &record.bytes[..record.len]);

    let unlock = whole_file_lock(libc::F_UNLCK as libc::c_short);
    if unsafe { libc::fcntl(fd, libc::F_SETLKW, &unlock) } == -1 {
        bail("vigil: could not unlock the log sink\n");
    }
}

/// Emits one record to the configured sink, if any.
pub(crate) fn emit(args: fmt::Arguments) {
    emit_to(sink_fd(), args);
}

/// Emits one record to the sink and unconditionally echoes it to
/// standard output, for records that must not be lost even when
/// logging is disabled.
pub(crate) fn emit_loud(args: fmt::Arguments) {
    emit(args);
    emit_to(libc::STDOUT_FILENO, args);
}

/// Logs a routine allocator event.
macro_rules! note {
    ($($arg:tt)*) => {
        $crate::journal::emit(format_args!($($arg)*))
    };
}

/// Logs a fault; echoed to standard output as well as the sink.
macro_rules! alert {
    ($($arg:tt)*) => {
        $crate::journal::emit_loud(format_args!($($arg)*))
    };
}

pub(crate) use alert;
pub(crate) use note;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_buf_truncates() {
        let mut buf = RecordBuf::new();
        let long = "x".repeat(2 * RECORD_CAPACITY);

        buf.write_str(&long).expect("writes never fail");
        assert_eq!(buf.len, RECORD_CAPACITY - 1);

        // Still room for the newline terminator.
        buf.bytes[buf.len] = b'\n';
    }

    #[test]
    fn record_buf_formats_in_place() {
        let mut buf = RecordBuf::new();

        buf.write_fmt(format_args!("malloc({})", 42usize))
            .expect("writes never fail");
        assert_eq!(&buf.bytes[..buf.len], b"malloc(42)");
    }
}
