use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by Asterisk, e.g. `2024-05-01T12:30:45.123+0200`.
pub const ASTERISK_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Envelope common to every ARI event.
///
/// Nothing downstream depends on the timestamp, so one that fails to parse
/// decodes as `None` instead of failing the whole event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(
        default,
        with = "asterisk_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asterisk_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    StasisStart {
        channel: ChannelInfo,
    },
    StasisEnd {
        channel: ChannelInfo,
    },
    ChannelHangupRequest {
        channel: ChannelInfo,
    },
    ChannelDestroyed {
        channel: ChannelInfo,
    },
    ChannelEnteredBridge {
        bridge: BridgeInfo,
        channel: ChannelInfo,
    },
    ChannelLeftBridge {
        bridge: BridgeInfo,
        channel: ChannelInfo,
    },
    BridgeBlindTransfer {
        channel: ChannelInfo,
        replace_channel: ChannelInfo,
    },
    BridgeDestroyed {
        bridge: BridgeInfo,
    },
    PlaybackFinished {
        playback: PlaybackInfo,
    },
    /// Any event type this controller does not react to.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub caller: CallerId,
    #[serde(default)]
    pub accountcode: String,
    #[serde(default)]
    pub dialplan: Dialplan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dialplan {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub exten: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfo {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    #[serde(default)]
    pub media_uri: String,
    pub target_uri: String,
}

mod asterisk_time {
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ASTERISK_TIME_LAYOUT;

    pub fn serialize<S>(
        value: &Option<DateTime<FixedOffset>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(ASTERISK_TIME_LAYOUT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| DateTime::parse_from_str(&s, ASTERISK_TIME_LAYOUT).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stasis_start() {
        let payload = r#"{
            "type": "StasisStart",
            "timestamp": "2024-05-01T12:30:45.123+0200",
            "asterisk_id": "00:11:22:33:44:55",
            "args": [],
            "channel": {
                "id": "1714559445.17",
                "name": "PJSIP/alice-00000011",
                "state": "Ring",
                "caller": {"name": "Alice", "number": "100"},
                "connected": {"name": "", "number": ""},
                "accountcode": "100",
                "dialplan": {"context": "from-internal", "exten": "200", "priority": 1}
            }
        }"#;

        let event = Event::decode(payload).unwrap();
        assert!(event.timestamp.is_some());
        assert_eq!(event.asterisk_id.as_deref(), Some("00:11:22:33:44:55"));
        match event.kind {
            EventKind::StasisStart { channel } => {
                assert_eq!(channel.id, "1714559445.17");
                assert_eq!(channel.state, "Ring");
                assert_eq!(channel.caller.number, "100");
                assert_eq!(channel.accountcode, "100");
                assert_eq!(channel.dialplan.context, "from-internal");
                assert_eq!(channel.dialplan.exten, "200");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unparseable_timestamp_does_not_fail_the_event() {
        let payload = r#"{"type": "BridgeDestroyed", "timestamp": "not a time", "bridge": {"id": "br-1"}}"#;
        let event = Event::decode(payload).unwrap();
        assert_eq!(event.timestamp, None);
        assert_eq!(
            event.kind,
            EventKind::BridgeDestroyed {
                bridge: BridgeInfo { id: "br-1".into() }
            }
        );
    }

    #[test]
    fn unknown_event_type_decodes_as_unknown() {
        let payload = r#"{"type": "ChannelVarset", "variable": "FOO", "value": "1"}"#;
        let event = Event::decode(payload).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(Event::decode("{ nope").is_err());
    }

    #[test]
    fn decodes_playback_finished() {
        let payload = r#"{
            "type": "PlaybackFinished",
            "playback": {
                "id": "pb-1",
                "media_uri": "sound:/sounds/vouncer_reject",
                "target_uri": "channel:1714559445.17",
                "state": "done"
            }
        }"#;
        let event = Event::decode(payload).unwrap();
        match event.kind {
            EventKind::PlaybackFinished { playback } => {
                assert_eq!(playback.media_uri, "sound:/sounds/vouncer_reject");
                assert_eq!(playback.target_uri, "channel:1714559445.17");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_blind_transfer() {
        let payload = r#"{
            "type": "BridgeBlindTransfer",
            "channel": {"id": "leg-b"},
            "replace_channel": {"id": "leg-c"},
            "exten": "300",
            "result": "Success"
        }"#;
        let event = Event::decode(payload).unwrap();
        match event.kind {
            EventKind::BridgeBlindTransfer {
                channel,
                replace_channel,
            } => {
                assert_eq!(channel.id, "leg-b");
                assert_eq!(replace_channel.id, "leg-c");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn round_trips_consumed_fields() {
        let original = Event {
            timestamp: DateTime::parse_from_str("2024-05-01T12:30:45.123+0200", ASTERISK_TIME_LAYOUT).ok(),
            asterisk_id: Some("00:11:22:33:44:55".into()),
            kind: EventKind::ChannelEnteredBridge {
                bridge: BridgeInfo { id: "br-1".into() },
                channel: ChannelInfo {
                    id: "leg-a".into(),
                    state: "Up".into(),
                    ..Default::default()
                },
            },
        };

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded = Event::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
