//! # Telemetry Protobuf Handler
//!
//! Rust representations of the model-driven telemetry messages streamed by the
//! devices. The envelope follows the GPB (compact) encoding: a `Telemetry`
//! header whose `data_gpb` table carries one row per entity, each row holding
//! the schema-specific payload in `content`.

use prost::Message;

/// The telemetry envelope delivered once per sample interval.
#[derive(Clone, PartialEq, Message)]
pub struct Telemetry {
    /// Host name of the device that produced the sample.
    #[prost(string, tag = "1")]
    pub node_id_str: String,

    /// Subscription the sample belongs to (e.g. "tviewerIFCS").
    #[prost(string, tag = "3")]
    pub subscription_id_str: String,

    /// YANG path of the sensor.
    #[prost(string, tag = "6")]
    pub encoding_path: String,

    #[prost(uint64, tag = "8")]
    pub collection_id: u64,

    #[prost(uint64, tag = "9")]
    pub collection_start_time: u64,

    /// Time the message was produced, in milliseconds since the Unix epoch.
    #[prost(uint64, tag = "10")]
    pub msg_timestamp: u64,

    /// The compact GPB table with one row per entity.
    #[prost(message, optional, tag = "12")]
    pub data_gpb: Option<TelemetryGpbTable>,

    #[prost(uint64, tag = "13")]
    pub collection_end_time: u64,
}

/// Container for the rows of a compact GPB sample.
#[derive(Clone, PartialEq, Message)]
pub struct TelemetryGpbTable {
    #[prost(message, repeated, tag = "1")]
    pub row: Vec<TelemetryRowGpb>,
}

/// One entity of a sample. `content` is decoded with the kind-specific schema.
#[derive(Clone, PartialEq, Message)]
pub struct TelemetryRowGpb {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,

    #[prost(bytes = "vec", tag = "10")]
    pub keys: Vec<u8>,

    #[prost(bytes = "vec", tag = "11")]
    pub content: Vec<u8>,
}

/// FIB interface information (`fib_sh_int`).
#[derive(Clone, PartialEq, Message)]
pub struct FibShInt {
    /// Interface name (e.g. "GigabitEthernet0/0/0/0").
    #[prost(string, tag = "1")]
    pub per_interface: String,

    /// Primary IPv4 address, or "UNKNOWN" / "NOT PRESENT" when unnumbered.
    #[prost(string, tag = "2")]
    pub primary_ipv4_address: String,
}

/// IS-IS neighbor information (`isis_sh_nbr`).
#[derive(Clone, PartialEq, Message)]
pub struct IsisShNbr {
    /// Local interface the adjacency is formed on.
    #[prost(string, tag = "1")]
    pub local_interface: String,

    /// Per address family neighbor data; the first entry carries IPv4.
    #[prost(message, repeated, tag = "2")]
    pub neighbor_per_address_family_data: Vec<IsisShNbrAfData>,
}

/// Neighbor data for one address family.
#[derive(Clone, PartialEq, Message)]
pub struct IsisShNbrAfData {
    #[prost(string, tag = "1")]
    pub af_name: String,

    #[prost(message, optional, tag = "2")]
    pub ipv4: Option<IsisNbrIpv4Data>,
}

/// IPv4 addresses the neighbor advertised on the shared link.
#[derive(Clone, PartialEq, Message)]
pub struct IsisNbrIpv4Data {
    #[prost(string, repeated, tag = "1")]
    pub interface_addresses: Vec<String>,
}
