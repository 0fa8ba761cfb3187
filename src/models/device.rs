// Managed device: identity, address, credential reference

use serde::{Deserialize, Serialize};

/// Key-based SSH access to a remote device. Never carries a password;
/// `identity_file` points at a key on the control host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Wake-on-LAN target. `broadcast` defaults to 255.255.255.255.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WolConfig {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,
}

/// A managed host. Identity is `id`; address and credentials may change
/// without changing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wol: Option<WolConfig>,
    /// Container names tracked on this device; empty means none.
    #[serde(default)]
    pub containers: Vec<String>,
}

impl Device {
    /// The built-in entry for the control host itself.
    pub fn local_host() -> Self {
        Device {
            id: "local".into(),
            name: "Control host".into(),
            address: "localhost".into(),
            is_local: true,
            ssh: None,
            wol: None,
            containers: Vec::new(),
        }
    }
}
