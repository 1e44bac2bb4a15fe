//! Exposed-port declarations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: NetworkProtocol,
    pub description: Option<String>,
}

impl ExposedPort {
    pub fn key(&self) -> (u16, NetworkProtocol) {
        (self.port, self.protocol)
    }
}
