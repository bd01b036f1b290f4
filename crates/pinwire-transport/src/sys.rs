//! Thin wrappers over the libc calls the Unix streams need.

use std::os::fd::RawFd;
use std::time::Duration;

/// Number of bytes queued for reading on `fd` (`FIONREAD`).
pub(crate) fn pending_bytes(fd: RawFd) -> std::io::Result<usize> {
    let mut count: libc::c_int = 0;
    // SAFETY: `count` is a valid writable c_int and `fd` is an open descriptor
    // owned by the calling stream for the duration of this call.
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut count as *mut libc::c_int) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(count.max(0) as usize)
}

/// Map a numeric baud rate onto its termios speed constant.
pub(crate) fn baud_to_speed(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

/// `VTIME` is expressed in tenths of a second and must fit a `cc_t`.
pub(crate) fn poll_to_vtime(interval: Duration) -> libc::cc_t {
    let tenths = interval.as_millis().div_ceil(100).clamp(1, 255);
    tenths as libc::cc_t
}

/// Put the tty behind `fd` into raw 8N1 mode at `speed`, with reads returning
/// after at most `vtime` tenths of a second.
pub(crate) fn configure_raw_tty(
    fd: RawFd,
    speed: libc::speed_t,
    vtime: libc::cc_t,
) -> std::io::Result<()> {
    // SAFETY: termios is plain old data; tcgetattr fully initialises it on success.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open tty descriptor and `tio` is a valid termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = vtime;

    // SAFETY: `fd` is an open tty descriptor and `tio` is fully initialised.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Update only the read timeout of an already configured tty.
pub(crate) fn set_tty_vtime(fd: RawFd, vtime: libc::cc_t) -> std::io::Result<()> {
    // SAFETY: see `configure_raw_tty`.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open tty descriptor and `tio` is a valid termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    tio.c_cc[libc::VTIME] = vtime;
    // SAFETY: `tio` was initialised by tcgetattr above.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
