//! Typed getters and setters for the property identifiers the session
//! core actually consults.

use super::{Properties, PropertyId, PropertyValue};
use bytes::Bytes;

macro_rules! get_typed {
    ($self:ident, $id:expr, $variant:ident) => {
        $self.get($id).and_then(|value| {
            if let PropertyValue::$variant(v) = value {
                Some(v.clone())
            } else {
                None
            }
        })
    };
}

impl Properties {
    #[must_use]
    pub fn maximum_qos(&self) -> Option<u8> {
        get_typed!(self, PropertyId::MaximumQoS, Byte)
    }

    #[must_use]
    pub fn retain_available(&self) -> Option<bool> {
        get_typed!(self, PropertyId::RetainAvailable, Byte).map(|v| v != 0)
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        get_typed!(self, PropertyId::ServerKeepAlive, TwoByteInteger)
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<String> {
        get_typed!(self, PropertyId::AssignedClientIdentifier, Utf8String)
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        get_typed!(self, PropertyId::MaximumPacketSize, FourByteInteger)
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        get_typed!(self, PropertyId::TopicAliasMaximum, TwoByteInteger)
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        get_typed!(self, PropertyId::TopicAlias, TwoByteInteger)
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<String> {
        get_typed!(self, PropertyId::AuthenticationMethod, Utf8String)
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<Bytes> {
        get_typed!(self, PropertyId::AuthenticationData, BinaryData)
    }

    #[must_use]
    pub fn reason_string(&self) -> Option<String> {
        get_typed!(self, PropertyId::ReasonString, Utf8String)
    }

    pub fn set_session_expiry_interval(&mut self, seconds: u32) {
        let _ = self.add(
            PropertyId::SessionExpiryInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_receive_maximum(&mut self, maximum: u16) {
        let _ = self.add(
            PropertyId::ReceiveMaximum,
            PropertyValue::TwoByteInteger(maximum),
        );
    }

    pub fn set_topic_alias_maximum(&mut self, maximum: u16) {
        let _ = self.add(
            PropertyId::TopicAliasMaximum,
            PropertyValue::TwoByteInteger(maximum),
        );
    }

    pub fn set_authentication_method(&mut self, method: impl Into<String>) {
        let _ = self.add(
            PropertyId::AuthenticationMethod,
            PropertyValue::Utf8String(method.into()),
        );
    }

    pub fn set_authentication_data(&mut self, data: Bytes) {
        let _ = self.add(
            PropertyId::AuthenticationData,
            PropertyValue::BinaryData(data),
        );
    }

    pub fn set_reason_string(&mut self, reason: impl Into<String>) {
        let _ = self.add(
            PropertyId::ReasonString,
            PropertyValue::Utf8String(reason.into()),
        );
    }

    pub fn add_user_property(&mut self, key: String, value: String) {
        self.entries
            .push((PropertyId::UserProperty, PropertyValue::Utf8StringPair(key, value)));
    }

    pub fn set_subscription_identifier(&mut self, id: u32) {
        self.entries.push((
            PropertyId::SubscriptionIdentifier,
            PropertyValue::VariableByteInteger(id),
        ));
    }
}
