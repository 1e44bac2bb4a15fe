//! OCI image config fields carried on a Container (the `config` part of
//! the value model in spec §3).

use crate::id::SecretId;
use crate::value::ordered_map::OrderedMap;
use crate::value::port::ExposedPort;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub env: OrderedMap<String, String>,
    pub secret_envs: OrderedMap<String, SecretId>,
    pub labels: OrderedMap<String, String>,
    pub entrypoint: Option<Vec<String>>,
    pub default_args: Option<Vec<String>>,
    pub exposed_ports: Vec<ExposedPort>,
}

impl ImageConfig {
    /// `withEnvVariable`: replaces any prior plain or secret value for
    /// `name`, preserving the insertion slot of a prior plain entry.
    pub fn with_env_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.secret_envs.remove(&name);
        self.env.insert(name, value.into());
        self
    }

    /// `withSecretVariable`: replaces any prior plain env of the same
    /// name and records the pairing in secretEnvs.
    pub fn with_secret_variable(mut self, name: impl Into<String>, secret: SecretId) -> Self {
        let name = name.into();
        self.env.remove(&name);
        self.secret_envs.insert(name, secret);
        self
    }

    /// `withoutEnvVariable`: removes from both plain env and secretEnvs.
    pub fn without_env_variable(mut self, name: &str) -> Self {
        self.env.remove(&name.to_string());
        self.secret_envs.remove(&name.to_string());
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn without_label(mut self, name: &str) -> Self {
        self.labels.remove(&name.to_string());
        self
    }

    pub fn with_exposed_port(
        mut self,
        port: u16,
        protocol: crate::value::port::NetworkProtocol,
        description: Option<String>,
    ) -> Self {
        let key = (port, protocol);
        self.exposed_ports.retain(|p| p.key() != key);
        self.exposed_ports.push(ExposedPort {
            port,
            protocol,
            description,
        });
        self
    }

    pub fn without_exposed_port(
        mut self,
        port: u16,
        protocol: crate::value::port::NetworkProtocol,
    ) -> Self {
        let key = (port, protocol);
        self.exposed_ports.retain(|p| p.key() != key);
        self
    }
}
