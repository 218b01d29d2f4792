//! Transport configuration
//!
//! The host process resolves its mode (secure or not, which program role it
//! runs as) once at startup and hands the resulting `TransportConfig` to
//! `SxClient`. Nothing in this crate reads process-wide state, so tests can
//! run secure and insecure clients side by side.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::certificate::{AlwaysTrust, PinnedRoots, ServerCertificateValidator, WebPkiRoots};
use crate::error::BuildError;

/// Timeout for calls that wait for an answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100_000);

/// Timeout for fire-and-forget calls nobody waits on.
pub const FIRE_AND_FORGET_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Which SX program this process runs as. Selects the client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProgramRole {
    Server,
    Client,
    DataServer,
    Custom(String),
}

impl ProgramRole {
    pub fn name(&self) -> &str {
        match self {
            ProgramRole::Server => "Server",
            ProgramRole::Client => "Client",
            ProgramRole::DataServer => "DataServer",
            ProgramRole::Custom(name) => name,
        }
    }
}

impl From<String> for ProgramRole {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Server" => ProgramRole::Server,
            "Client" => ProgramRole::Client,
            "DataServer" => ProgramRole::DataServer,
            _ => ProgramRole::Custom(name),
        }
    }
}

impl From<ProgramRole> for String {
    fn from(role: ProgramRole) -> Self {
        role.name().to_string()
    }
}

impl fmt::Display for ProgramRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Force `https://` and attach the role's client certificate
    #[serde(default)]
    pub secure: bool,

    /// Role used for the certificate lookup
    #[serde(default = "default_program_role")]
    pub program_role: ProgramRole,

    /// Value for `SX-Client-IP`; discovered from the host when absent
    #[serde(default)]
    pub client_ip: Option<Ipv4Addr>,

    /// Timeout for sync calls and async calls with a callback
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Timeout for fire-and-forget calls
    #[serde(default = "default_fire_and_forget_timeout_ms")]
    pub fire_and_forget_timeout_ms: u64,

    /// Accept any server certificate in secure mode
    #[serde(default)]
    pub trust_any_server_certificate: bool,

    /// PEM roots to trust instead of the bundled web PKI roots
    #[serde(default)]
    pub pinned_roots_pem: Option<String>,

    /// Redirects are always followed, up to this many hops
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    #[serde(skip)]
    validator: Option<Arc<dyn ServerCertificateValidator>>,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("secure", &self.secure)
            .field("program_role", &self.program_role)
            .field("client_ip", &self.client_ip)
            .field("timeout_ms", &self.timeout_ms)
            .field("fire_and_forget_timeout_ms", &self.fire_and_forget_timeout_ms)
            .field("trust_any_server_certificate", &self.trust_any_server_certificate)
            .field("pinned_roots", &self.pinned_roots_pem.is_some())
            .field("max_redirects", &self.max_redirects)
            .field("validator", &self.validator)
            .finish()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            secure: false,
            program_role: default_program_role(),
            client_ip: None,
            timeout_ms: default_timeout_ms(),
            fire_and_forget_timeout_ms: default_fire_and_forget_timeout_ms(),
            trust_any_server_certificate: false,
            pinned_roots_pem: None,
            max_redirects: default_max_redirects(),
            validator: None,
        }
    }
}

impl TransportConfig {
    /// Plain `http://` transport.
    pub fn insecure() -> Self {
        Self::default()
    }

    /// `https://` with the client certificate of `role`.
    pub fn secure(role: ProgramRole) -> Self {
        Self {
            secure: true,
            program_role: role,
            ..Default::default()
        }
    }

    /// Parse a JSON config document, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_client_ip(mut self, ip: Ipv4Addr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_fire_and_forget_timeout(mut self, timeout: Duration) -> Self {
        self.fire_and_forget_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Accept every server certificate. Only meaningful in secure mode.
    pub fn trusting_any_server_certificate(mut self) -> Self {
        self.trust_any_server_certificate = true;
        self
    }

    pub fn with_pinned_roots(mut self, pem: impl Into<String>) -> Self {
        self.pinned_roots_pem = Some(pem.into());
        self
    }

    /// Install a custom validator; takes precedence over the flag fields.
    pub fn with_validator(mut self, validator: Arc<dyn ServerCertificateValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fire_and_forget_timeout(&self) -> Duration {
        Duration::from_millis(self.fire_and_forget_timeout_ms)
    }

    pub fn client_ip(&self) -> Ipv4Addr {
        self.client_ip.unwrap_or_else(local_ipv4)
    }

    /// Resolve the server-certificate validator this config selects.
    pub fn server_validator(&self) -> Result<Arc<dyn ServerCertificateValidator>, BuildError> {
        if let Some(validator) = &self.validator {
            return Ok(Arc::clone(validator));
        }
        if self.trust_any_server_certificate {
            return Ok(Arc::new(AlwaysTrust));
        }
        match &self.pinned_roots_pem {
            Some(pem) => Ok(Arc::new(PinnedRoots::from_pem(pem.as_bytes())?)),
            None => Ok(Arc::new(WebPkiRoots)),
        }
    }
}

/// First IPv4 address of this machine, discovered once per process.
pub fn local_ipv4() -> Ipv4Addr {
    static ADDR: OnceLock<Ipv4Addr> = OnceLock::new();
    *ADDR.get_or_init(discover_ipv4)
}

fn discover_ipv4() -> Ipv4Addr {
    // Connecting a UDP socket sends nothing; it only picks the outbound interface.
    let discover = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match discover() {
        Ok(IpAddr::V4(addr)) if !addr.is_unspecified() => addr,
        _ => Ipv4Addr::LOCALHOST,
    }
}

fn default_program_role() -> ProgramRole {
    ProgramRole::Client
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_fire_and_forget_timeout_ms() -> u64 {
    FIRE_AND_FORGET_TIMEOUT.as_millis() as u64
}

fn default_max_redirects() -> u32 {
    10
}
