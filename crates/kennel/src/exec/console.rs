//! Console socket hand-off.
//!
//! A caller that passes `--console-socket` listens on a Unix socket and
//! expects the pty master of the container terminal to arrive there as a
//! single `SCM_RIGHTS` message.

#![allow(unsafe_code)]

use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::ptr;

use tokio::time::Instant;

use kennel_common::{KennelError, KennelResult};

/// Payload sent along with the pty master.
pub const TERMINAL_PAYLOAD: &[u8] = b"terminal";

/// Connect to the console socket before `deadline`.
///
/// The returned stream is blocking, with a write timeout of whatever is left
/// until the deadline.
///
/// # Errors
///
/// Returns a timeout error if the deadline passes, or a supervision error if
/// the socket refuses the connection.
pub async fn connect(path: &Path, deadline: Instant) -> KennelResult<UnixStream> {
    let stream = tokio::time::timeout_at(deadline, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| KennelError::timeout(format!("connect to console socket {}", path.display())))?
        .map_err(|e| {
            KennelError::supervision(format!(
                "failed to connect to console socket {}: {e}",
                path.display()
            ))
        })?;

    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(KennelError::timeout(format!(
            "connect to console socket {}",
            path.display()
        )));
    }
    stream.set_write_timeout(Some(remaining))?;

    tracing::debug!(path = %path.display(), "Connected to console socket");
    Ok(stream)
}

/// Send the pty master over the console socket.
///
/// # Errors
///
/// Returns a supervision error if `sendmsg` fails.
pub fn send_terminal(stream: &UnixStream, master: BorrowedFd<'_>) -> KennelResult<()> {
    send_fd(stream.as_raw_fd(), TERMINAL_PAYLOAD, master.as_raw_fd())?;
    tracing::debug!(fd = master.as_raw_fd(), "Sent pty master to console socket");
    Ok(())
}

fn send_fd(sock_fd: RawFd, buf: &[u8], fd: RawFd) -> KennelResult<()> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut cmsg_buf = [0u8; 64];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as usize };

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&raw const msg) };
    if cmsg.is_null() {
        return Err(KennelError::Internal {
            message: "no room for SCM_RIGHTS header".to_string(),
        });
    }
    unsafe {
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as usize;
        ptr::write(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd);
    }

    let n = unsafe { libc::sendmsg(sock_fd, &raw const msg, libc::MSG_NOSIGNAL) };
    if n < 0 {
        return Err(KennelError::supervision(format!(
            "sendmsg to console socket failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, Write};
    use std::os::fd::{AsFd, FromRawFd, OwnedFd};
    use std::time::Duration;

    /// Receive one payload and one fd, the way a console socket listener does.
    fn recv_fd(stream: &UnixStream) -> (Vec<u8>, OwnedFd) {
        let mut buf = [0u8; 64];
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: buf.len(),
        };
        let mut cmsg_buf = [0u8; 64];
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &raw mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = cmsg_buf.len();

        let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &raw mut msg, 0) };
        assert!(n > 0, "recvmsg failed: {}", std::io::Error::last_os_error());

        let cmsg = unsafe { libc::CMSG_FIRSTHDR(&raw const msg) };
        assert!(!cmsg.is_null());
        let fd = unsafe {
            assert_eq!((*cmsg).cmsg_type, libc::SCM_RIGHTS);
            ptr::read(libc::CMSG_DATA(cmsg).cast::<RawFd>())
        };
        (buf[..n as usize].to_vec(), unsafe { OwnedFd::from_raw_fd(fd) })
    }

    #[test]
    fn sends_fd_with_payload() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"console").unwrap();

        send_terminal(&sender, file.as_fd()).unwrap();
        let (payload, fd) = recv_fd(&receiver);
        assert_eq!(payload, TERMINAL_PAYLOAD);

        let mut received = std::fs::File::from(fd);
        received.rewind().unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "console");
    }

    #[tokio::test]
    async fn connect_to_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let stream = connect(&path, deadline).await.unwrap();
        assert!(stream.write_timeout().unwrap().is_some());
    }

    #[tokio::test]
    async fn connect_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = connect(&dir.path().join("absent.sock"), deadline).await.unwrap_err();
        assert!(matches!(err, KennelError::Supervision { .. }));
    }
}
