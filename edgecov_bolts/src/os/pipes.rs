//! Unix `pipe` wrapper for `edgecov`

use std::{
    io::{self, ErrorKind, Read, Write},
    os::unix::io::RawFd,
};

use crate::Error;

/// A unix pipe wrapper for `edgecov`, holding the read and write end.
/// Either end can be dropped early, the way a forked supervisor and its
/// child each keep only their half.
#[derive(Debug)]
pub struct Pipe {
    read_end: Option<RawFd>,
    write_end: Option<RawFd>,
}

impl Pipe {
    /// Create a new [`Pipe`]
    pub fn new() -> Result<Self, Error> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::last_os_error("Failed to create a pipe"));
        }
        Ok(Self {
            read_end: Some(fds[0]),
            write_end: Some(fds[1]),
        })
    }

    /// Close the read end of this pipe
    pub fn close_read_end(&mut self) {
        if let Some(read_end) = self.read_end {
            unsafe {
                libc::close(read_end);
            }
            self.read_end = None;
        }
    }

    /// Close the write end of this pipe
    pub fn close_write_end(&mut self) {
        if let Some(write_end) = self.write_end {
            unsafe {
                libc::close(write_end);
            }
            self.write_end = None;
        }
    }

    /// The read end of this pipe, if still open
    #[must_use]
    pub fn read_end(&self) -> Option<RawFd> {
        self.read_end
    }

    /// The write end of this pipe, if still open
    #[must_use]
    pub fn write_end(&self) -> Option<RawFd> {
        self.write_end
    }
}

impl Read for Pipe {
    /// Reads a few bytes
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        match self.read_end {
            Some(read_end) => {
                let res = unsafe { libc::read(read_end, buf.as_mut_ptr() as *mut _, buf.len()) };
                if res < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(res as usize)
                }
            }
            None => Err(io::Error::new(
                ErrorKind::BrokenPipe,
                "Read pipe end was already closed",
            )),
        }
    }
}

impl Write for Pipe {
    /// Writes a few bytes
    fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        match self.write_end {
            Some(write_end) => {
                let res = unsafe { libc::write(write_end, buf.as_ptr() as *const _, buf.len()) };
                if res < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(res as usize)
                }
            }
            None => Err(io::Error::new(
                ErrorKind::BrokenPipe,
                "Write pipe end was already closed",
            )),
        }
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.close_read_end();
        self.close_write_end();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::Pipe;
    use crate::Error;

    #[test]
    fn test_pipe_roundtrip() -> Result<(), Error> {
        let mut pipe = Pipe::new()?;
        pipe.write_all(b"edgecov")?;
        let mut buf = [0_u8; 7];
        pipe.read_exact(&mut buf)?;
        assert_eq!(&buf, b"edgecov");
        Ok(())
    }

    #[test]
    fn test_pipe_eof_after_write_end_closed() -> Result<(), Error> {
        let mut pipe = Pipe::new()?;
        pipe.write_all(b"x")?;
        pipe.close_write_end();
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        assert_eq!(buf, b"x");
        Ok(())
    }
}
