use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A serial tty configured for raw 8N1 byte transfer.
///
/// Reads return `Ok(0)` after roughly 100 ms without input (`VMIN = 0`,
/// `VTIME = 1`), so a read loop can poll for shutdown between bytes. This
/// does not mean end of stream.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    baud: u32,
}

impl SerialPort {
    /// Open `path` and put it in raw mode at `baud`.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_to_speed(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        let fd = file.as_raw_fd();

        // SAFETY: `fd` is an open descriptor owned by `file` for the duration of this call.
        if unsafe { libc::isatty(fd) } != 1 {
            return Err(TransportError::NotATty { path });
        }

        // SAFETY: an all-zero termios is a valid value to be overwritten by tcgetattr.
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };

        // SAFETY: `fd` is a valid tty descriptor and `tio` is a writable termios.
        if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        // SAFETY: `tio` was initialised by tcgetattr above.
        unsafe {
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 1;

        // SAFETY: `fd` is a valid tty descriptor and `tio` is a fully initialised termios.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        info!(?path, baud, "opened serial port");
        Ok(Self { file, path, baud })
    }

    /// Duplicate the descriptor so reading and writing can live on different threads.
    pub fn try_clone(&self) -> Result<Self> {
        let file = self.file.try_clone()?;
        debug!(path = ?self.path, "cloned serial port handle");
        Ok(Self {
            file,
            path: self.path.clone(),
            baud: self.baud,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish()
    }
}

fn baud_to_speed(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}
