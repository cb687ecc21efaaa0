// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line sources feeding the acquirer: serial device, any `BufRead`, or a channel.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

/// Default serial line speed of the sensor firmware.
pub const DEFAULT_BAUD: u32 = 9600;

/// A stream of text lines.
///
/// The acquirer owns its source for its whole lifetime and calls
/// [`LineSource::close`] exactly once when it exits.
pub trait LineSource: Send {
    /// Read the next line without its `\r\n` terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Release the underlying handle. Further reads return `Ok(None)`.
    fn close(&mut self) -> io::Result<()>;
}

impl LineSource for Box<dyn LineSource> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        (**self).read_line()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Line source over any buffered reader (stdin, files, in-memory cursors).
pub struct ReaderSource<R> {
    reader: Option<R>,
    buf: Vec<u8>,
}

impl<R: BufRead + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            buf: Vec::with_capacity(128),
        }
    }
}

impl<R: BufRead + Send> LineSource for ReaderSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        self.buf.clear();
        if reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }

        // Serial noise is common right after the port opens; keep the line
        // and let the parser discard whatever it cannot use.
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Line source fed through an mpsc channel. Ends when every sender is dropped.
pub struct ChannelSource {
    rx: Option<Receiver<String>>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx: Some(rx) }
    }
}

impl LineSource for ChannelSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.rx.as_ref().and_then(|rx| rx.recv().ok()))
    }

    fn close(&mut self) -> io::Result<()> {
        self.rx = None;
        Ok(())
    }
}

/// Serial device opened in raw 8N1 mode.
pub struct SerialSource {
    path: PathBuf,
    inner: ReaderSource<BufReader<File>>,
}

impl SerialSource {
    /// Open `path` and configure the line speed.
    ///
    /// Non-tty paths (FIFOs, plain files) are accepted and read as-is.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.read(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOCTTY);
        }
        let file = options.open(&path)?;

        configure_tty(&file, baud)?;
        tracing::debug!(device = %path.display(), baud, "Serial device opened");

        Ok(Self {
            path,
            inner: ReaderSource::new(BufReader::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSource for SerialSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.inner.read_line()
    }

    fn close(&mut self) -> io::Result<()> {
        tracing::debug!(device = %self.path.display(), "Closing serial device");
        self.inner.close()
    }
}

/// Open the line source named by `device`: `-` for stdin, otherwise a serial device.
pub fn open_device(device: &str, baud: u32) -> io::Result<Box<dyn LineSource>> {
    if device == "-" {
        tracing::debug!("Reading lines from stdin");
        return Ok(Box::new(ReaderSource::new(BufReader::new(io::stdin()))));
    }
    Ok(Box::new(SerialSource::open(device, baud)?))
}

#[cfg(unix)]
fn configure_tty(file: &File, baud: u32) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let speed = baud_constant(baud)?;
    let fd = file.as_raw_fd();

    // SAFETY: fd is a valid descriptor owned by `file` for the duration of
    // this call; termios is plain data initialised by tcgetattr.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOTTY) {
                tracing::debug!("Source is not a tty, skipping line configuration");
                return Ok(());
            }
            return Err(err);
        }

        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 0;

        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn configure_tty(_file: &File, _baud: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> io::Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate: {}", other),
            ))
        }
    };
    Ok(speed)
}
