use std::{env, io, os::unix::net::UnixDatagram};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unable to notify service manager: {0}")]
pub struct NotifyError(#[from] io::Error);

/// Reports agent health to whatever supervises the process
pub trait Notifier: Send {
    fn ready(&self) -> Result<(), NotifyError>;
    fn watchdog(&self) -> Result<(), NotifyError>;
}

/// Speaks the `sd_notify` datagram protocol on `$NOTIFY_SOCKET`
///
/// Without a socket every notification is silently dropped, so the agent
/// also runs outside of systemd.
#[derive(Debug, Clone, Default)]
pub struct SystemdNotifier {
    socket: Option<String>,
}

impl SystemdNotifier {
    pub fn new(socket: Option<String>) -> Self {
        Self {
            socket: socket.filter(|s| !s.is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(env::var("NOTIFY_SOCKET").ok())
    }

    fn notify(&self, state: &str) -> Result<(), NotifyError> {
        let Some(path) = &self.socket else {
            return Ok(());
        };
        let socket = UnixDatagram::unbound()?;
        match path.strip_prefix('@') {
            Some(name) => send_abstract(&socket, name, state)?,
            None => {
                socket.send_to(state.as_bytes(), path)?;
            }
        }
        debug!("sent {} to {}", state, path);
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &UnixDatagram, name: &str, state: &str) -> io::Result<()> {
    use std::os::{linux::net::SocketAddrExt, unix::net::SocketAddr};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.send_to_addr(state.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_: &UnixDatagram, _: &str, _: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract notify sockets require Linux",
    ))
}

impl Notifier for SystemdNotifier {
    fn ready(&self) -> Result<(), NotifyError> {
        self.notify("READY=1")
    }

    fn watchdog(&self) -> Result<(), NotifyError> {
        self.notify("WATCHDOG=1")
    }
}
