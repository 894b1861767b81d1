//! # Record Decoder
//!
//! Turns one encoded telemetry message into typed records. Decoding is pure:
//! the caller passes the local receive time, which stands in for the device
//! timestamp when the envelope does not carry one.

use prost::Message;

use crate::error::DecodeError;
use crate::model::{InterfaceRecord, Ipv4Address, NeighborRecord, Record, ResourceKind};
use crate::telemetry::proto_handler::{FibShInt, IsisShNbr, Telemetry};

/// Address values the device reports for interfaces without IPv4 addressing.
const UNADDRESSED: [&str; 3] = ["", "UNKNOWN", "NOT PRESENT"];

/// Records decoded from one message, all stamped with the same observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub observed_at: u64,
    pub records: Vec<Record>,
}

/// Decodes one message of the given kind for `device`.
///
/// # Errors
/// Returns [`DecodeError`] when the envelope or any row does not match the
/// schema for `kind`, or when an address that should be IPv4 is not.
pub fn decode(
    device: &str,
    kind: ResourceKind,
    payload: &[u8],
    received_at: u64,
) -> Result<DecodedMessage, DecodeError> {
    let envelope = Telemetry::decode(payload).map_err(|e| DecodeError::Malformed {
        kind,
        reason: format!("envelope: {e}"),
    })?;

    let expected = kind.subscription_id();
    if !envelope.subscription_id_str.is_empty() && envelope.subscription_id_str != expected {
        return Err(DecodeError::WrongSubscription {
            kind,
            expected,
            found: envelope.subscription_id_str,
        });
    }

    let observed_at = match envelope.msg_timestamp {
        0 => received_at,
        ts => ts,
    };

    let rows = envelope.data_gpb.map(|table| table.row).unwrap_or_default();
    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let record = match kind {
            ResourceKind::Interface => decode_interface(device, &row.content, observed_at, index)?,
            ResourceKind::Neighbor => decode_neighbor(device, &row.content, observed_at, index)?,
        };
        records.extend(record);
    }

    Ok(DecodedMessage { observed_at, records })
}

fn decode_interface(
    device: &str,
    content: &[u8],
    observed_at: u64,
    index: usize,
) -> Result<Option<Record>, DecodeError> {
    let kind = ResourceKind::Interface;
    let info = FibShInt::decode(content).map_err(|e| DecodeError::Malformed {
        kind,
        reason: format!("row {index}: {e}"),
    })?;

    let address = info.primary_ipv4_address.trim();
    if UNADDRESSED.contains(&address) {
        return Ok(None);
    }
    if info.per_interface.is_empty() {
        return Err(DecodeError::Malformed {
            kind,
            reason: format!("row {index}: interface name missing"),
        });
    }

    Ok(Some(Record::Interface(InterfaceRecord {
        device: device.to_string(),
        interface: info.per_interface,
        ipv4: parse_address(kind, address)?,
        observed_at,
    })))
}

fn decode_neighbor(
    device: &str,
    content: &[u8],
    observed_at: u64,
    index: usize,
) -> Result<Option<Record>, DecodeError> {
    let kind = ResourceKind::Neighbor;
    let nbr = IsisShNbr::decode(content).map_err(|e| DecodeError::Malformed {
        kind,
        reason: format!("row {index}: {e}"),
    })?;

    // Only the first address family and its first address identify the neighbor.
    let address = nbr
        .neighbor_per_address_family_data
        .first()
        .and_then(|af| af.ipv4.as_ref())
        .and_then(|ipv4| ipv4.interface_addresses.first());

    let Some(address) = address else {
        return Ok(None);
    };
    if nbr.local_interface.is_empty() {
        return Err(DecodeError::Malformed {
            kind,
            reason: format!("row {index}: local interface missing"),
        });
    }

    Ok(Some(Record::Neighbor(NeighborRecord {
        device: device.to_string(),
        local_interface: nbr.local_interface,
        neighbor_ipv4: parse_address(kind, address)?,
        observed_at,
    })))
}

fn parse_address(kind: ResourceKind, value: &str) -> Result<Ipv4Address, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidAddress {
        kind,
        value: value.to_string(),
    })
}
