//! Named-data packets exchanged at the network boundary.
//!
//! Only the fields the traffic engine reads are modelled: the name (which
//! carries the request sequence number as its last component), the Interest
//! nonce and lifetime, and the Data freshness period and push flag. The hop
//! count is a lower-layer tag attached on reception and is never encoded.
//!
//! Binary layout (all integers big-endian):
//!
//! ```text
//! NAME     : count(2) + { len(2) + utf8(len) } * count
//! INTEREST : 0x05 + NAME + nonce(4) + lifetime_ms(4) + flags(1)
//! DATA     : 0x06 + NAME + freshness_ms(4) + flags(1)
//!                 + sig_type(1) + sig_value(4) + has_locator(1) [+ NAME]
//!                 + content_len(4) + content(N)
//! NACK     : 0x07 + reason(1) + INTEREST
//! ```
//!
//! Encoding fails with [`TrafficError::FieldTooLarge`] when a name has more
//! than 65535 components, a component is longer than 65535 bytes, or content
//! exceeds `u32::MAX` bytes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrafficError};

/// Signature type used for simulated packets that carry no real signature.
pub const FAKE_SIGNATURE_TYPE: u8 = 255;

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Interest = 0x05,
    Data = 0x06,
    Nack = 0x07,
}

impl TryFrom<u8> for PacketType {
    type Error = TrafficError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x05 => Ok(PacketType::Interest),
            0x06 => Ok(PacketType::Data),
            0x07 => Ok(PacketType::Nack),
            other => Err(TrafficError::UnknownPacketType(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Name
// ---------------------------------------------------------------------------

/// A hierarchical name such as `/cam/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    /// The root name `/`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Append one component in place.
    pub fn push(&mut self, component: impl Into<String>) {
        self.components.push(component.into());
    }

    /// Returns a copy of this name with `seq` appended as the last component.
    pub fn with_sequence(&self, seq: u32) -> Name {
        let mut name = self.clone();
        name.push(seq.to_string());
        name
    }

    /// Parse the last component as a request sequence number.
    pub fn sequence(&self) -> Option<u32> {
        self.components.last().and_then(|c| c.parse().ok())
    }

    /// Whether every component of `self` is a leading component of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a == b)
    }

    fn encoded_len(&self) -> usize {
        2 + self.components.iter().map(|c| 2 + c.len()).sum::<usize>()
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(u16_len("name component count", self.components.len())?);
        for c in &self.components {
            buf.put_u16(u16_len("name component", c.len())?);
            buf.put_slice(c.as_bytes());
        }
        Ok(())
    }

    fn decode_from(data: &mut &[u8]) -> Result<Self> {
        ensure_len(data, 2)?;
        let count = data.get_u16() as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            ensure_len(data, 2)?;
            let len = data.get_u16() as usize;
            ensure_len(data, len)?;
            let component = std::str::from_utf8(&data[..len])
                .map_err(|_| TrafficError::InvalidNameComponent)?
                .to_owned();
            data.advance(len);
            components.push(component);
        }
        Ok(Name { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Name::from(s))
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name {
            components: s
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::from(s.as_str())
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

// ---------------------------------------------------------------------------
// Interest
// ---------------------------------------------------------------------------

const INTEREST_MUST_BE_FRESH: u8 = 0x01;
const INTEREST_CAN_BE_PREFIX: u8 = 0x02;

/// A request for named content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub nonce: u32,
    pub lifetime: Duration,
    pub must_be_fresh: bool,
    pub can_be_prefix: bool,
}

impl Interest {
    pub fn new(name: Name, nonce: u32, lifetime: Duration) -> Self {
        Self {
            name,
            nonce,
            lifetime,
            must_be_fresh: false,
            can_be_prefix: false,
        }
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.name.encoded_len() + 4 + 4 + 1
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(PacketType::Interest as u8);
        self.name.encode_into(buf)?;
        buf.put_u32(self.nonce);
        buf.put_u32(duration_to_ms(self.lifetime));
        let mut flags = 0u8;
        if self.must_be_fresh {
            flags |= INTEREST_MUST_BE_FRESH;
        }
        if self.can_be_prefix {
            flags |= INTEREST_CAN_BE_PREFIX;
        }
        buf.put_u8(flags);
        Ok(())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        expect_type(&mut data, PacketType::Interest)?;
        Self::decode_body(&mut data)
    }

    fn decode_body(data: &mut &[u8]) -> Result<Self> {
        let name = Name::decode_from(data)?;
        ensure_len(data, 9)?; // 4+4+1
        let nonce = data.get_u32();
        let lifetime = Duration::from_millis(data.get_u32() as u64);
        let flags = data.get_u8();
        Ok(Interest {
            name,
            nonce,
            lifetime,
            must_be_fresh: flags & INTEREST_MUST_BE_FRESH != 0,
            can_be_prefix: flags & INTEREST_CAN_BE_PREFIX != 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

const DATA_PUSHED: u8 = 0x01;

/// Signature information carried by a Data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature_type: u8,
    pub key_locator: Option<Name>,
    pub value: u32,
}

impl SignatureInfo {
    /// A placeholder signature: `value` 0 means "valid".
    pub fn fake(value: u32, key_locator: Option<Name>) -> Self {
        Self {
            signature_type: FAKE_SIGNATURE_TYPE,
            key_locator,
            value,
        }
    }
}

impl Default for SignatureInfo {
    fn default() -> Self {
        Self::fake(0, None)
    }
}

/// A named response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    /// Zero means the producer imposes no freshness limit.
    pub freshness_period: Duration,
    pub content: Bytes,
    pub pushed: bool,
    pub signature: SignatureInfo,
    /// Lower-layer hop-count tag. `None` for packets that never crossed a link.
    pub hop_count: Option<u32>,
}

impl Data {
    pub fn new(name: Name, content: Bytes) -> Self {
        Self {
            name,
            freshness_period: Duration::ZERO,
            content,
            pushed: false,
            signature: SignatureInfo::default(),
            hop_count: None,
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness_period = freshness;
        self
    }

    pub fn with_pushed(mut self, pushed: bool) -> Self {
        self.pushed = pushed;
        self
    }

    pub fn with_signature(mut self, signature: SignatureInfo) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_hop_count(mut self, hop_count: u32) -> Self {
        self.hop_count = Some(hop_count);
        self
    }

    pub fn hop_count(&self) -> Option<u32> {
        self.hop_count
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encoded_len(&self) -> usize {
        let locator = self
            .signature
            .key_locator
            .as_ref()
            .map_or(0, Name::encoded_len);
        1 + self.name.encoded_len() + 4 + 1 + 1 + 4 + 1 + locator + 4 + self.content.len()
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(PacketType::Data as u8);
        self.name.encode_into(buf)?;
        buf.put_u32(duration_to_ms(self.freshness_period));
        buf.put_u8(if self.pushed { DATA_PUSHED } else { 0 });
        buf.put_u8(self.signature.signature_type);
        buf.put_u32(self.signature.value);
        match &self.signature.key_locator {
            Some(locator) => {
                buf.put_u8(1);
                locator.encode_into(buf)?;
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(u32_len("content", self.content.len())?);
        buf.put_slice(&self.content);
        Ok(())
    }

    /// Decode a Data packet. The hop-count tag is not part of the encoding
    /// and is always `None` on the result.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        expect_type(&mut data, PacketType::Data)?;
        let name = Name::decode_from(&mut data)?;
        ensure_len(data, 11)?; // 4+1+1+4+1
        let freshness_period = Duration::from_millis(data.get_u32() as u64);
        let flags = data.get_u8();
        let signature_type = data.get_u8();
        let value = data.get_u32();
        let key_locator = match data.get_u8() {
            0 => None,
            _ => Some(Name::decode_from(&mut data)?),
        };
        ensure_len(data, 4)?;
        let content_len = data.get_u32() as usize;
        ensure_len(data, content_len)?;
        let content = Bytes::copy_from_slice(&data[..content_len]);
        Ok(Data {
            name,
            freshness_period,
            content,
            pushed: flags & DATA_PUSHED != 0,
            signature: SignatureInfo {
                signature_type,
                key_locator,
                value,
            },
            hop_count: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Nack
// ---------------------------------------------------------------------------

/// Why a forwarder rejected an Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NackReason {
    None = 0x00,
    Congestion = 0x01,
    Duplicate = 0x02,
    NoRoute = 0x03,
}

impl TryFrom<u8> for NackReason {
    type Error = TrafficError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(NackReason::None),
            0x01 => Ok(NackReason::Congestion),
            0x02 => Ok(NackReason::Duplicate),
            0x03 => Ok(NackReason::NoRoute),
            other => Err(TrafficError::UnknownNackReason(other)),
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::None => write!(f, "None"),
            NackReason::Congestion => write!(f, "Congestion"),
            NackReason::Duplicate => write!(f, "Duplicate"),
            NackReason::NoRoute => write!(f, "NoRoute"),
        }
    }
}

/// A negative acknowledgment carrying the rejected Interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub interest: Interest,
    pub reason: NackReason,
}

impl Nack {
    pub fn new(interest: Interest, reason: NackReason) -> Self {
        Self { interest, reason }
    }

    pub fn name(&self) -> &Name {
        &self.interest.name
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(2 + self.interest.encoded_len());
        buf.put_u8(PacketType::Nack as u8);
        buf.put_u8(self.reason as u8);
        self.interest.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        expect_type(&mut data, PacketType::Nack)?;
        ensure_len(data, 1)?;
        let reason = NackReason::try_from(data.get_u8())?;
        let interest = Interest::decode(data)?;
        Ok(Nack { interest, reason })
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// Any packet crossing the network boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Interest(_) => PacketType::Interest,
            Packet::Data(_) => PacketType::Data,
            Packet::Nack(_) => PacketType::Nack,
        }
    }

    pub fn name(&self) -> &Name {
        match self {
            Packet::Interest(i) => &i.name,
            Packet::Data(d) => &d.name,
            Packet::Nack(n) => n.name(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Packet::Interest(i) => i.encode(),
            Packet::Data(d) => d.encode(),
            Packet::Nack(n) => n.encode(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some(&tag) = data.first() else {
            return Err(TrafficError::PacketTooShort {
                expected: 1,
                actual: 0,
            });
        };
        match PacketType::try_from(tag)? {
            PacketType::Interest => Interest::decode(data).map(Packet::Interest),
            PacketType::Data => Data::decode(data).map(Packet::Data),
            PacketType::Nack => Nack::decode(data).map(Packet::Nack),
        }
    }
}

fn expect_type(data: &mut &[u8], expected: PacketType) -> Result<()> {
    ensure_len(data, 1)?;
    let actual = PacketType::try_from(data.get_u8())?;
    if actual != expected {
        return Err(TrafficError::UnknownPacketType(actual as u8));
    }
    Ok(())
}

fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(TrafficError::PacketTooShort {
            expected: needed,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}

fn duration_to_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn u16_len(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| TrafficError::FieldTooLarge {
        field,
        len,
        max: u16::MAX as usize,
    })
}

fn u32_len(field: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| TrafficError::FieldTooLarge {
        field,
        len,
        max: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_display_and_parse() {
        let name = Name::from("/cam/front");
        assert_eq!(name.len(), 2);
        assert_eq!(name.to_string(), "/cam/front");
        assert_eq!(Name::root().to_string(), "/");
        assert_eq!(Name::from("//cam//").to_string(), "/cam");
    }

    #[test]
    fn sequence_component() {
        let name = Name::from("/cam").with_sequence(42);
        assert_eq!(name.to_string(), "/cam/42");
        assert_eq!(name.sequence(), Some(42));
        assert_eq!(Name::from("/cam").sequence(), None);
        assert!(Name::from("/cam").is_prefix_of(&name));
        assert!(!name.is_prefix_of(&Name::from("/cam")));
    }

    #[test]
    fn data_keeps_push_flag_and_freshness_but_drops_hop_tag() {
        let data = Data::new(Name::from("/cam"), Bytes::from(vec![0u8; 600]))
            .with_freshness(Duration::from_millis(1000))
            .with_pushed(true)
            .with_signature(SignatureInfo::fake(7, Some(Name::from("/key"))))
            .with_hop_count(3);
        let decoded = Data::decode(&data.encode().unwrap()).unwrap();
        assert!(decoded.pushed);
        assert_eq!(decoded.freshness_period, Duration::from_millis(1000));
        assert_eq!(decoded.content.len(), 600);
        assert_eq!(decoded.signature.key_locator, Some(Name::from("/key")));
        assert_eq!(decoded.hop_count(), None);
    }

    #[test]
    fn nack_carries_interest() {
        let interest = Interest::new(Name::from("/cam/3"), 99, Duration::from_secs(1))
            .with_must_be_fresh(true);
        let nack = Nack::new(interest.clone(), NackReason::NoRoute);
        match Packet::decode(&nack.encode().unwrap()).unwrap() {
            Packet::Nack(n) => {
                assert_eq!(n.reason, NackReason::NoRoute);
                assert_eq!(n.interest, interest);
            }
            other => panic!("expected nack, got {other:?}"),
        }
    }

    #[test]
    fn truncated_packet_rejected() {
        let bytes = Interest::new(Name::from("/a"), 1, Duration::from_secs(1))
            .encode()
            .unwrap();
        let err = Interest::decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, TrafficError::PacketTooShort { .. }));
        assert!(matches!(
            Packet::decode(&[]),
            Err(TrafficError::PacketTooShort { .. })
        ));
        assert!(matches!(
            Packet::decode(&[0xee]),
            Err(TrafficError::UnknownPacketType(0xee))
        ));
    }

    #[test]
    fn oversized_component_is_rejected() {
        let mut name = Name::from("/cam");
        name.push("x".repeat(70_000));
        let interest = Interest::new(name.clone(), 1, Duration::from_secs(1));
        assert!(matches!(
            interest.encode(),
            Err(TrafficError::FieldTooLarge {
                field: "name component",
                len: 70_000,
                ..
            })
        ));
        let data = Data::new(name, Bytes::new());
        assert!(Packet::Data(data).encode().is_err());

        let mut widest = Name::from("/cam");
        widest.push("y".repeat(u16::MAX as usize));
        let data = Data::new(widest.clone(), Bytes::new());
        assert_eq!(Data::decode(&data.encode().unwrap()).unwrap().name, widest);
    }
}
