mod accessors;
mod codec;

use crate::error::{MqttError, Result};

/// MQTT v5 property identifier. The discriminant is the on-wire varint
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

impl PropertyId {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PayloadFormatIndicator),
            0x02 => Some(Self::MessageExpiryInterval),
            0x03 => Some(Self::ContentType),
            0x08 => Some(Self::ResponseTopic),
            0x09 => Some(Self::CorrelationData),
            0x0B => Some(Self::SubscriptionIdentifier),
            0x11 => Some(Self::SessionExpiryInterval),
            0x12 => Some(Self::AssignedClientIdentifier),
            0x13 => Some(Self::ServerKeepAlive),
            0x15 => Some(Self::AuthenticationMethod),
            0x16 => Some(Self::AuthenticationData),
            0x17 => Some(Self::RequestProblemInformation),
            0x18 => Some(Self::WillDelayInterval),
            0x19 => Some(Self::RequestResponseInformation),
            0x1A => Some(Self::ResponseInformation),
            0x1C => Some(Self::ServerReference),
            0x1F => Some(Self::ReasonString),
            0x21 => Some(Self::ReceiveMaximum),
            0x22 => Some(Self::TopicAliasMaximum),
            0x23 => Some(Self::TopicAlias),
            0x24 => Some(Self::MaximumQoS),
            0x25 => Some(Self::RetainAvailable),
            0x26 => Some(Self::UserProperty),
            0x27 => Some(Self::MaximumPacketSize),
            0x28 => Some(Self::WildcardSubscriptionAvailable),
            0x29 => Some(Self::SubscriptionIdentifierAvailable),
            0x2A => Some(Self::SharedSubscriptionAvailable),
            _ => None,
        }
    }

    /// Properties allowed to appear more than once in a packet.
    #[must_use]
    pub fn allows_multiple(&self) -> bool {
        matches!(self, Self::UserProperty | Self::SubscriptionIdentifier)
    }

    #[must_use]
    pub fn value_type(&self) -> PropertyValueType {
        match self {
            Self::PayloadFormatIndicator
            | Self::RequestProblemInformation
            | Self::RequestResponseInformation
            | Self::MaximumQoS
            | Self::RetainAvailable
            | Self::WildcardSubscriptionAvailable
            | Self::SubscriptionIdentifierAvailable
            | Self::SharedSubscriptionAvailable => PropertyValueType::Byte,

            Self::ServerKeepAlive
            | Self::ReceiveMaximum
            | Self::TopicAliasMaximum
            | Self::TopicAlias => PropertyValueType::TwoByteInteger,

            Self::MessageExpiryInterval
            | Self::SessionExpiryInterval
            | Self::WillDelayInterval
            | Self::MaximumPacketSize => PropertyValueType::FourByteInteger,

            Self::SubscriptionIdentifier => PropertyValueType::VariableByteInteger,

            Self::ContentType
            | Self::ResponseTopic
            | Self::AssignedClientIdentifier
            | Self::AuthenticationMethod
            | Self::ResponseInformation
            | Self::ServerReference
            | Self::ReasonString => PropertyValueType::Utf8String,

            Self::CorrelationData | Self::AuthenticationData => PropertyValueType::BinaryData,

            Self::UserProperty => PropertyValueType::Utf8StringPair,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValueType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    BinaryData,
    Utf8String,
    Utf8StringPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(u32),
    BinaryData(bytes::Bytes),
    Utf8String(String),
    Utf8StringPair(String, String),
}

impl PropertyValue {
    #[must_use]
    pub fn value_type(&self) -> PropertyValueType {
        match self {
            Self::Byte(_) => PropertyValueType::Byte,
            Self::TwoByteInteger(_) => PropertyValueType::TwoByteInteger,
            Self::FourByteInteger(_) => PropertyValueType::FourByteInteger,
            Self::VariableByteInteger(_) => PropertyValueType::VariableByteInteger,
            Self::BinaryData(_) => PropertyValueType::BinaryData,
            Self::Utf8String(_) => PropertyValueType::Utf8String,
            Self::Utf8StringPair(_, _) => PropertyValueType::Utf8StringPair,
        }
    }

    #[must_use]
    pub fn matches_type(&self, expected: PropertyValueType) -> bool {
        self.value_type() == expected
    }
}

/// Ordered v5 property set.
///
/// Stored as a flat list of (identifier, value) pairs so that encoding
/// preserves insertion order on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub(crate) entries: Vec<(PropertyId, PropertyValue)>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns an error if the value type does not match the identifier's
    /// expected type, or on a duplicate of a single-occurrence property.
    pub fn add(&mut self, id: PropertyId, value: PropertyValue) -> Result<()> {
        if !value.matches_type(id.value_type()) {
            return Err(MqttError::ProtocolError(format!(
                "Property {:?} expects type {:?}, got {:?}",
                id,
                id.value_type(),
                value.value_type()
            )));
        }

        if !id.allows_multiple() && self.contains(id) {
            return Err(MqttError::DuplicatePropertyId(id as u8));
        }

        self.entries.push((id, value));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, value)| value)
    }

    pub fn get_all(&self, id: PropertyId) -> impl Iterator<Item = &PropertyValue> + '_ {
        self.entries
            .iter()
            .filter(move |(entry_id, _)| *entry_id == id)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, id: PropertyId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub fn remove(&mut self, id: PropertyId) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> + '_ {
        self.entries.iter().map(|(id, value)| (*id, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_property_id_from_u8() {
        assert_eq!(
            PropertyId::from_u8(0x01),
            Some(PropertyId::PayloadFormatIndicator)
        );
        assert_eq!(PropertyId::from_u8(0x26), Some(PropertyId::UserProperty));
        assert_eq!(PropertyId::from_u8(0x00), None);
        assert_eq!(PropertyId::from_u8(0xFF), None);
    }

    #[test]
    fn test_add_type_mismatch() {
        let mut props = Properties::new();
        let result = props.add(PropertyId::MaximumQoS, PropertyValue::Utf8String("2".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_single_occurrence_rejected() {
        let mut props = Properties::new();
        props
            .add(PropertyId::ServerKeepAlive, PropertyValue::TwoByteInteger(30))
            .unwrap();
        let result = props.add(
            PropertyId::ServerKeepAlive,
            PropertyValue::TwoByteInteger(60),
        );
        assert!(matches!(result, Err(MqttError::DuplicatePropertyId(0x13))));
    }

    #[test]
    fn test_user_property_allows_multiple() {
        let mut props = Properties::new();
        props.add_user_property("a".into(), "1".into());
        props.add_user_property("b".into(), "2".into());
        assert_eq!(props.get_all(PropertyId::UserProperty).count(), 2);
    }

    #[test]
    fn test_insertion_order_preserved_on_encode() {
        let mut props = Properties::new();
        props.add_user_property("first".into(), "1".into());
        props
            .add(PropertyId::ContentType, PropertyValue::Utf8String("text".into()))
            .unwrap();
        props.add_user_property("second".into(), "2".into());

        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();

        // Skip the varint length prefix, then check identifier order.
        let body = &buf[1..];
        assert_eq!(body[0], 0x26);
        let first_pair_len = 2 + 5 + 2 + 1; // "first" + "1" with prefixes
        assert_eq!(body[1 + first_pair_len], 0x03);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut props = Properties::new();
        props
            .add(PropertyId::SessionExpiryInterval, PropertyValue::FourByteInteger(3600))
            .unwrap();
        props
            .add(PropertyId::ReceiveMaximum, PropertyValue::TwoByteInteger(20))
            .unwrap();
        props
            .add(
                PropertyId::CorrelationData,
                PropertyValue::BinaryData(Bytes::from_static(&[1, 2, 3])),
            )
            .unwrap();
        props.add_user_property("trace".into(), "abc".into());

        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();
        let decoded = Properties::decode(&mut buf).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_decode_unknown_identifier() {
        let mut buf = BytesMut::new();
        // length 2, identifier 0x7B (unassigned), one byte of payload
        buf.extend_from_slice(&[0x02, 0x7B, 0x00]);
        assert!(matches!(
            Properties::decode(&mut buf),
            Err(MqttError::UnexpectedTokens(_))
        ));
    }

    #[test]
    fn test_empty_properties_encode_as_zero_length() {
        let props = Properties::new();
        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00]);
    }
}
