use std::io;
use std::os::unix::io::RawFd;

#[cfg(target_os = "linux")]
use crate::runtime::config;
use crate::runtime::DataType;
use crate::runtime::Error;
use crate::runtime::SampleVec;

const HEADER_SIZE: usize = 4;
const READ_CHUNK: usize = 16384;

/// Create the OS pipe backing one edge.
///
/// Both descriptors start blocking; the cooperative driver switches the read
/// end to non-blocking when it takes over.
pub(crate) fn open_pipe(dtype: DataType, rate: f64) -> Result<(PipeWriter, PipeReader), Error> {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret < 0 {
        return Err(Error::os("pipe"));
    }

    #[cfg(target_os = "linux")]
    unsafe {
        // best effort; the kernel clamps or rejects out-of-range sizes
        libc::fcntl(
            fds[1],
            libc::F_SETPIPE_SZ,
            config::config().pipe_size as libc::c_int,
        );
    }

    Ok((
        PipeWriter {
            fd: fds[1],
            dtype,
            rate,
            closed: false,
        },
        PipeReader {
            fd: fds[0],
            dtype,
            rate,
            raw: Vec::new(),
            payload: Vec::new(),
            frame_rem: 0,
            eof: false,
            closed: false,
        },
    ))
}

/// Writing end of a pipe, owned by the source output port.
///
/// Vectors are framed as a native-endian `u32` sample count followed by
/// `count * stride` payload bytes. The wire format is private to the runtime.
#[derive(Debug)]
pub struct PipeWriter {
    fd: RawFd,
    dtype: DataType,
    rate: f64,
    closed: bool,
}

impl PipeWriter {
    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn fileno(&self) -> RawFd {
        self.fd
    }

    /// Write one framed vector. Blocks until the reader has drained enough
    /// of the pipe buffer.
    pub fn write(&mut self, v: &SampleVec) -> Result<(), Error> {
        debug_assert_eq!(v.data_type(), self.dtype);
        debug_assert!(!self.closed);
        let header = (v.len() as u32).to_ne_bytes();
        self.write_all(&header)?;
        self.write_all(v.bytes())
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            let n = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Transport(e));
            }
            buf = &buf[n as usize..];
        }
        Ok(())
    }

    /// Close the writing end, signaling EOF to the reader.
    pub fn close(&mut self) {
        if !self.closed {
            unsafe { libc::close(self.fd) };
            self.closed = true;
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading end of a pipe, owned by the destination input port.
///
/// Bytes are buffered and deframed; samples become visible only once their
/// frame is complete, so a reader never observes a torn vector.
#[derive(Debug)]
pub struct PipeReader {
    fd: RawFd,
    dtype: DataType,
    rate: f64,
    raw: Vec<u8>,
    payload: Vec<u8>,
    frame_rem: usize,
    eof: bool,
    closed: bool,
}

impl PipeReader {
    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn fileno(&self) -> RawFd {
        self.fd
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), Error> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(Error::os("fcntl"));
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) } < 0 {
            return Err(Error::os("fcntl"));
        }
        Ok(())
    }

    /// One `read(2)`. In blocking mode this suspends until the writer
    /// produces or closes; in non-blocking mode it returns `false` when the
    /// pipe is drained. Returns whether bytes arrived.
    pub fn fill(&mut self) -> Result<bool, Error> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n < 0 {
                let e = io::Error::last_os_error();
                match e.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock => return Ok(false),
                    _ => return Err(Error::Transport(e)),
                }
            }
            if n == 0 {
                self.eof = true;
                return Ok(false);
            }
            self.raw.extend_from_slice(&buf[..n as usize]);
            self.deframe();
            return Ok(true);
        }
    }

    /// Drain everything currently in the pipe. Only meaningful on a
    /// non-blocking descriptor.
    pub fn fill_available(&mut self) -> Result<(), Error> {
        while self.fill()? {}
        Ok(())
    }

    fn deframe(&mut self) {
        loop {
            if self.frame_rem > 0 {
                let take = self.frame_rem.min(self.raw.len());
                if take == 0 {
                    break;
                }
                self.payload.extend(self.raw.drain(..take));
                self.frame_rem -= take;
            } else if self.raw.len() >= HEADER_SIZE {
                let mut header = [0u8; HEADER_SIZE];
                header.copy_from_slice(&self.raw[..HEADER_SIZE]);
                self.raw.drain(..HEADER_SIZE);
                self.frame_rem = u32::from_ne_bytes(header) as usize * self.dtype.size();
            } else {
                break;
            }
        }
    }

    /// Complete samples currently buffered.
    pub fn available(&self) -> usize {
        self.payload.len() / self.dtype.size()
    }

    /// The writer closed and every buffered sample has been consumed.
    pub fn at_eof(&self) -> bool {
        self.eof && self.payload.is_empty()
    }

    /// Take `n` buffered samples. `n` must not exceed [available](Self::available).
    pub fn read(&mut self, n: usize) -> SampleVec {
        let len = n * self.dtype.size();
        debug_assert!(len <= self.payload.len());
        let bytes: Vec<u8> = self.payload.drain(..len).collect();
        SampleVec::from_bytes(self.dtype, bytes)
    }

    pub fn close(&mut self) {
        if !self.closed {
            unsafe { libc::close(self.fd) };
            self.closed = true;
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}
