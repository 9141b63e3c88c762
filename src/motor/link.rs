// One TCP connection to one drive
//
// A `Session` is the scoped connection: it is opened by `MotorLink::connect`,
// carries one or more command/reply exchanges, and closes the socket when it
// is dropped, whichever way the caller leaves.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::scl::{self, ParsedReply, ProtocolError};
use crate::config::MotorEndpoint;

/// Receive buffer size; a reply always fits in one read
const RECV_BUFFER_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Cannot reach {motor} at {addr}: {source}")]
    Unreachable {
        motor: String,
        addr: String,
        source: std::io::Error,
    },

    #[error("Timed out connecting to {motor} at {addr}")]
    Timeout { motor: String, addr: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Timed out waiting for {motor} to answer '{command}'")]
    Timeout { motor: String, command: String },

    #[error("Bad reply from {motor}: {source}")]
    Protocol {
        motor: String,
        source: ProtocolError,
    },

    #[error("No open session to {motor}")]
    NotConnected { motor: String },

    #[error("{motor} closed the connection")]
    Closed { motor: String },

    #[error("IO error talking to {motor}: {source}")]
    Io {
        motor: String,
        source: std::io::Error,
    },
}

/// Connection factory for a single drive.
#[derive(Debug, Clone)]
pub struct MotorLink {
    endpoint: MotorEndpoint,
    timeout: Duration,
}

impl MotorLink {
    /// `timeout` overrides the endpoint's own protocol timeout (health checks use a shorter one).
    pub fn new(endpoint: &MotorEndpoint, timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.unwrap_or_else(|| endpoint.timeout()),
            endpoint: endpoint.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a session to the drive.
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        let addr = self.endpoint.address();
        let connect = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port));

        let stream = match timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectionError::Unreachable {
                    motor: self.endpoint.name.clone(),
                    addr,
                    source,
                });
            }
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    motor: self.endpoint.name.clone(),
                    addr,
                });
            }
        };

        // Frames are tiny; don't let Nagle hold back a trigger.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(motor = %self.endpoint.name, "Failed to set TCP_NODELAY: {}", e);
        }

        trace!(motor = %self.endpoint.name, %addr, "session opened");
        Ok(Session {
            motor: self.endpoint.name.clone(),
            stream: Some(stream),
            timeout: self.timeout,
        })
    }
}

/// An open connection to one drive. Dropping it closes the socket.
#[derive(Debug)]
pub struct Session {
    motor: String,
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl Session {
    pub fn motor(&self) -> &str {
        &self.motor
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one command and return the decoded reply payload.
    ///
    /// After a timeout or transport failure the stream is in an unknown state
    /// (a late reply could still arrive), so the session drops it and every
    /// further call fails with `NotConnected`.
    pub async fn send_command(&mut self, command: &str) -> Result<String, LinkError> {
        let result = self.exchange(command).await;

        match &result {
            Ok(reply) => {
                debug!(motor = %self.motor, command, reply = %reply, "command ok");
            }
            Err(LinkError::NotConnected { .. }) => {
                warn!(motor = %self.motor, command, "command sent outside a session");
            }
            Err(e) => {
                warn!(motor = %self.motor, command, error = %e, "command failed");
                if !matches!(e, LinkError::Protocol { .. }) {
                    self.stream = None;
                }
            }
        }
        result
    }

    /// Send one command and interpret the reply.
    pub async fn query(&mut self, command: &str) -> Result<ParsedReply, LinkError> {
        let reply = self.send_command(command).await?;
        Ok(ParsedReply::parse(&reply))
    }

    async fn exchange(&mut self, command: &str) -> Result<String, LinkError> {
        let motor = &self.motor;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::NotConnected {
                motor: motor.clone(),
            })?;

        let frame = scl::encode(command);
        let timed_out = || LinkError::Timeout {
            motor: motor.clone(),
            command: command.to_string(),
        };
        let io_error = |source| LinkError::Io {
            motor: motor.clone(),
            source,
        };

        timeout(self.timeout, stream.write_all(&frame))
            .await
            .map_err(|_| timed_out())?
            .map_err(io_error)?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = timeout(self.timeout, stream.read(&mut buf))
            .await
            .map_err(|_| timed_out())?
            .map_err(io_error)?;

        if n == 0 {
            return Err(LinkError::Closed {
                motor: motor.clone(),
            });
        }

        scl::decode(&buf[..n]).map_err(|source| LinkError::Protocol {
            motor: motor.clone(),
            source,
        })
    }

    /// Close the connection explicitly, flushing our side first.
    pub async fn close(mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(motor = %self.motor, "shutdown failed: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!(motor = %self.motor, "session closed");
    }
}
