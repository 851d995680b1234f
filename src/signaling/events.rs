//! Контракт событий relay-сервера. Имена событий совпадают с именами на проводе.

use crate::error::SignalingError;
use crate::peer::types::NegotiationPayload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ----- исходящие -----
pub const FIND_VIDEO_PARTNER: &str = "find-video-partner";
pub const FIND_TEXT_PARTNER: &str = "find-text-partner";
pub const CALL_PARTNER: &str = "call-partner";
pub const ANSWER_CALL: &str = "answer-call";
pub const END_CALL: &str = "end-call";
pub const SEND_MESSAGE: &str = "send-message";

// ----- входящие -----
pub const INCOMING_CALL: &str = "incoming-call";
pub const CALL_ACCEPTED: &str = "call-accepted";
pub const PARTNER_DISCONNECTED: &str = "partner-disconnected";
pub const PRESENCE_COUNT: &str = "presence-count";
pub const RECEIVE_MESSAGE: &str = "receive-message";
pub const CHAT_CONNECTED: &str = "chat-connected";

// в обе стороны
pub const TYPING: &str = "typing";

// локальные события жизненного цикла транспорта, на провод не уходят
pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";

/// Кадр на проводе: `{"event": "...", "data": ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelayFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl RelayFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|source| SignalingError::Decode {
            event: "<frame>".into(),
            source,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallPartnerPayload {
    pub target_id: String,
    pub offer: NegotiationPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCallPayload {
    pub target_id: String,
    pub answer: NegotiationPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallPayload {
    pub from_id: String,
    pub offer: NegotiationPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallAcceptedPayload {
    pub answer: NegotiationPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePayload {
    pub count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatConnectedPayload {
    #[serde(default)]
    pub partner_id: Option<String>,
}

/// Входящее событие relay, разобранное в типизированный вид
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    IncomingCall(IncomingCallPayload),
    CallAccepted(CallAcceptedPayload),
    PartnerDisconnected,
    Presence(PresencePayload),
    ReceiveMessage(MessagePayload),
    Typing,
    ChatConnected(ChatConnectedPayload),
    /// транспорт (пере)подключён
    Connected,
    /// транспорт потерян
    Disconnected,
}

impl RelayEvent {
    pub fn parse(event: &str, data: &Value) -> Result<Self, SignalingError> {
        Ok(match event {
            INCOMING_CALL => RelayEvent::IncomingCall(payload(event, data)?),
            CALL_ACCEPTED => RelayEvent::CallAccepted(payload(event, data)?),
            PARTNER_DISCONNECTED => RelayEvent::PartnerDisconnected,
            PRESENCE_COUNT => RelayEvent::Presence(payload(event, data)?),
            RECEIVE_MESSAGE => RelayEvent::ReceiveMessage(payload(event, data)?),
            TYPING => RelayEvent::Typing,
            CHAT_CONNECTED if data.is_null() => {
                RelayEvent::ChatConnected(ChatConnectedPayload::default())
            }
            CHAT_CONNECTED => RelayEvent::ChatConnected(payload(event, data)?),
            CONNECT => RelayEvent::Connected,
            DISCONNECT => RelayEvent::Disconnected,
            other => return Err(SignalingError::UnknownEvent(other.to_string())),
        })
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: &Value) -> Result<T, SignalingError> {
    T::deserialize(data).map_err(|source| SignalingError::Decode {
        event: event.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::SdpKind;
    use serde_json::json;

    #[test]
    fn frame_omits_null_data() {
        let frame = RelayFrame::new(END_CALL, Value::Null);
        assert_eq!(frame.encode().unwrap(), r#"{"event":"end-call"}"#);
        assert_eq!(RelayFrame::decode(r#"{"event":"typing"}"#).unwrap().data, Value::Null);
    }

    #[test]
    fn call_payloads_use_camel_case() {
        let payload = AnswerCallPayload {
            target_id: "X".into(),
            answer: NegotiationPayload::answer("v=0"),
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "targetId": "X", "answer": { "type": "answer", "sdp": "v=0" } })
        );
    }

    #[test]
    fn parses_incoming_call() {
        let event = RelayEvent::parse(
            INCOMING_CALL,
            &json!({ "fromId": "X", "offer": { "type": "offer", "sdp": "v=0" } }),
        )
        .unwrap();
        match event {
            RelayEvent::IncomingCall(p) => {
                assert_eq!(p.from_id, "X");
                assert_eq!(p.offer.kind, SdpKind::Offer);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn chat_connected_payload_is_optional() {
        assert_eq!(
            RelayEvent::parse(CHAT_CONNECTED, &Value::Null).unwrap(),
            RelayEvent::ChatConnected(ChatConnectedPayload::default())
        );
        assert_eq!(
            RelayEvent::parse(CHAT_CONNECTED, &json!({ "partnerId": "p1" })).unwrap(),
            RelayEvent::ChatConnected(ChatConnectedPayload {
                partner_id: Some("p1".into())
            })
        );
    }

    #[test]
    fn malformed_and_unknown_events_are_errors() {
        assert!(matches!(
            RelayEvent::parse(PRESENCE_COUNT, &json!({ "count": -1 })),
            Err(SignalingError::Decode { .. })
        ));
        assert!(matches!(
            RelayEvent::parse("callUser", &Value::Null),
            Err(SignalingError::UnknownEvent(_))
        ));
    }
}
