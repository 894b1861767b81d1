//! # Domain Model
//!
//! Devices, resource kinds and the keyed records the collectors keep in the
//! state store. Records are keyed by `(device, name)` where `name` is the
//! interface name for interface records and the local interface name for
//! neighbor records.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

/// Category of telemetry a collector subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Interface addressing (FIB interface table).
    Interface,
    /// IS-IS neighbor adjacencies.
    Neighbor,
}

impl ResourceKind {
    /// Every kind a device is collected for.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Interface, ResourceKind::Neighbor];

    /// The subscription identifier configured on the device for this kind.
    pub fn subscription_id(self) -> &'static str {
        match self {
            ResourceKind::Interface => "tviewerIFCS",
            ResourceKind::Neighbor => "tviewerISIS",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Interface => f.write_str("interface"),
            ResourceKind::Neighbor => f.write_str("neighbor"),
        }
    }
}

/// Login material for a device.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// # Device Descriptor
///
/// Identifies one device to collect from. Owned by whoever registered the
/// device; collectors hold it behind an `Arc` and never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device name, also the first half of every record key.
    pub name: String,
    /// Host name or IP address of the device.
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(deserialize_with = "port_from_number_or_text")]
    pub port: u16,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// PEM file holding the certificate the device presents, if any.
    #[serde(default)]
    pub certificate: Option<PathBuf>,
}

impl DeviceDescriptor {
    /// `address:port`, as used in connection targets and log lines.
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Registry files and the device form send the port as text.
fn port_from_number_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port {text:?}"))),
    }
}

/// An IPv4 address with an optional prefix length (`10.0.0.1` or `10.0.0.1/24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Address {
    pub addr: Ipv4Addr,
    pub prefix_len: Option<u8>,
}

impl Ipv4Address {
    pub fn new(addr: Ipv4Addr) -> Self {
        Self { addr, prefix_len: None }
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self::new(addr)
    }
}

/// Error returned when text is not `a.b.c.d` or `a.b.c.d/n` with `n <= 32`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid IPv4 address '{}'", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for Ipv4Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || AddressParseError(s.to_string());
        let (addr, prefix_len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len: u8 = len.parse().map_err(|_| err())?;
                if len > 32 {
                    return Err(err());
                }
                (addr, Some(len))
            }
            None => (s, None),
        };
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| err())?;
        Ok(Self { addr, prefix_len })
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix_len {
            Some(len) => write!(f, "{}/{}", self.addr, len),
            None => write!(f, "{}", self.addr),
        }
    }
}

impl Serialize for Ipv4Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Latest observed addressing of one interface on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub device: String,
    pub interface: String,
    pub ipv4: Ipv4Address,
    /// Milliseconds since the Unix epoch.
    pub observed_at: u64,
}

/// Latest observed adjacency on one local interface of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub device: String,
    pub local_interface: String,
    pub neighbor_ipv4: Ipv4Address,
    /// Milliseconds since the Unix epoch.
    pub observed_at: u64,
}

/// Unique key of a record within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub device: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self { device: device.into(), name: name.into() }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.name)
    }
}

/// One decoded, keyed observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Interface(InterfaceRecord),
    Neighbor(NeighborRecord),
}

impl Record {
    /// Builds a record of `kind` from its key parts and value.
    pub fn new(
        kind: ResourceKind,
        device: impl Into<String>,
        name: impl Into<String>,
        value: Ipv4Address,
        observed_at: u64,
    ) -> Self {
        match kind {
            ResourceKind::Interface => Record::Interface(InterfaceRecord {
                device: device.into(),
                interface: name.into(),
                ipv4: value,
                observed_at,
            }),
            ResourceKind::Neighbor => Record::Neighbor(NeighborRecord {
                device: device.into(),
                local_interface: name.into(),
                neighbor_ipv4: value,
                observed_at,
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Record::Interface(_) => ResourceKind::Interface,
            Record::Neighbor(_) => ResourceKind::Neighbor,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Record::Interface(r) => &r.device,
            Record::Neighbor(r) => &r.device,
        }
    }

    pub fn key(&self) -> RecordKey {
        match self {
            Record::Interface(r) => RecordKey::new(&r.device, &r.interface),
            Record::Neighbor(r) => RecordKey::new(&r.device, &r.local_interface),
        }
    }

    /// The value-bearing field compared by change detection.
    pub fn value(&self) -> Ipv4Address {
        match self {
            Record::Interface(r) => r.ipv4,
            Record::Neighbor(r) => r.neighbor_ipv4,
        }
    }

    pub fn observed_at(&self) -> u64 {
        match self {
            Record::Interface(r) => r.observed_at,
            Record::Neighbor(r) => r.observed_at,
        }
    }

    pub fn set_observed_at(&mut self, observed_at: u64) {
        match self {
            Record::Interface(r) => r.observed_at = observed_at,
            Record::Neighbor(r) => r.observed_at = observed_at,
        }
    }
}

impl From<InterfaceRecord> for Record {
    fn from(record: InterfaceRecord) -> Self {
        Record::Interface(record)
    }
}

impl From<NeighborRecord> for Record {
    fn from(record: NeighborRecord) -> Self {
        Record::Neighbor(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_address_parsing() {
        let plain: Ipv4Address = "10.0.0.1".parse().unwrap();
        assert_eq!(plain.addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(plain.prefix_len, None);

        let prefixed: Ipv4Address = " 192.168.1.9/24 ".parse().unwrap();
        assert_eq!(prefixed.prefix_len, Some(24));
        assert_eq!(prefixed.to_string(), "192.168.1.9/24");

        assert!("10.0.0.1/33".parse::<Ipv4Address>().is_err());
        assert!("UNKNOWN".parse::<Ipv4Address>().is_err());
        assert!("fe80::1".parse::<Ipv4Address>().is_err());
    }

    #[test]
    fn test_device_descriptor_accepts_registry_field_names() {
        let json = r#"{
            "name": "R1",
            "ip": "172.16.0.1",
            "port": 57777,
            "username": "admin",
            "password": "secret",
            "certificate": "certs/R1.pem"
        }"#;
        let device: DeviceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(device.address, "172.16.0.1");
        assert_eq!(device.target(), "172.16.0.1:57777");
        assert_eq!(device.credentials.password, "secret");

        // The password never leaves the process.
        let out = serde_json::to_string(&device).unwrap();
        assert!(!out.contains("secret"));
        assert!(!format!("{:?}", device).contains("secret"));
    }

    #[test]
    fn test_device_descriptor_port_as_text() {
        let json = r#"{"name":"R2","ip":"10.0.0.2","port":"57777","username":"u","password":"p"}"#;
        let device: DeviceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(device.port, 57777);

        let bad = r#"{"name":"R2","ip":"10.0.0.2","port":"grpc","username":"u","password":"p"}"#;
        assert!(serde_json::from_str::<DeviceDescriptor>(bad).is_err());
        let out_of_range = r#"{"name":"R2","ip":"10.0.0.2","port":70000,"username":"u","password":"p"}"#;
        assert!(serde_json::from_str::<DeviceDescriptor>(out_of_range).is_err());
    }

    #[test]
    fn test_record_key_and_value() {
        let record = Record::from(NeighborRecord {
            device: "R1".to_string(),
            local_interface: "Gi0/0/0/0".to_string(),
            neighbor_ipv4: "10.1.1.2".parse().unwrap(),
            observed_at: 7,
        });
        assert_eq!(record.kind(), ResourceKind::Neighbor);
        assert_eq!(record.key(), RecordKey::new("R1", "Gi0/0/0/0"));
        assert_eq!(record.value().to_string(), "10.1.1.2");
    }
}
