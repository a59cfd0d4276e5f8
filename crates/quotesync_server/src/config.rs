//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the QuoteSync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// User ids notified about lifecycle changes.
    pub staff: Vec<String>,
    /// Upper bound for a single request's store work.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server config.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            staff: Vec::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Adds one staff recipient.
    pub fn with_staff_member(mut self, user_id: impl Into<String>) -> Self {
        self.staff.push(user_id.into());
        self
    }

    /// Replaces the staff recipients.
    pub fn with_staff<I, S>(mut self, staff: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.staff = staff.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
