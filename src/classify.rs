use std::fmt;

use serde::{Serialize, Serializer};
use strum_macros::Display;

use crate::capture::FrameRecord;
use crate::dot11::{MacAddress, SUBTYPE_DEAUTHENTICATION, SUBTYPE_DISASSOCIATION};
use crate::error::FrameAnomaly;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Display)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
pub enum EventKind {
    #[strum(serialize = "DEAUTH")]
    Deauth,
    #[strum(serialize = "DISASSOC")]
    Disassoc,
    #[strum(serialize = "EAPOL")]
    EapolObserved,
}

/// Who sent a frame. `Unknown` never compares equal to a real address.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SourceId {
    Mac(MacAddress),
    Unknown,
}

impl SourceId {
    pub fn is_known(&self) -> bool {
        matches!(self, SourceId::Mac(_))
    }
}

impl From<Option<MacAddress>> for SourceId {
    fn from(addr: Option<MacAddress>) -> Self {
        addr.map_or(SourceId::Unknown, SourceId::Mac)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Mac(mac) => write!(f, "{mac}"),
            SourceId::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedEvent {
    pub timestamp: f64,
    pub kind: EventKind,
    pub source: SourceId,
    pub dest: Option<MacAddress>,
}

/// The capture time of a frame, if it can be placed on the timeline at all.
pub fn frame_timestamp(frame: &FrameRecord) -> Result<f64, FrameAnomaly> {
    match frame.timestamp {
        None => Err(FrameAnomaly::MissingTimestamp),
        Some(ts) if !ts.is_finite() => Err(FrameAnomaly::NonFiniteTimestamp(ts)),
        Some(ts) => Ok(ts),
    }
}

fn event_kind(frame: &FrameRecord) -> Option<EventKind> {
    match &frame.header {
        Some(header) if header.is_management(SUBTYPE_DEAUTHENTICATION) => Some(EventKind::Deauth),
        Some(header) if header.is_management(SUBTYPE_DISASSOCIATION) => Some(EventKind::Disassoc),
        _ if frame.eapol => Some(EventKind::EapolObserved),
        _ => None,
    }
}

/// Map one decoded frame to an attack-relevant event.
///
/// Frames without a usable timestamp are never classified.
pub fn classify(frame: &FrameRecord) -> Option<ClassifiedEvent> {
    let timestamp = frame_timestamp(frame).ok()?;
    let kind = event_kind(frame)?;
    let (source, dest) = match &frame.header {
        Some(header) => (SourceId::from(header.addr2), header.addr1),
        None => (SourceId::Unknown, None),
    };

    Some(ClassifiedEvent {
        timestamp,
        kind,
        source,
        dest,
    })
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::dot11::tests::{eapol_frame, mgmt_frame, AP, STA};

    fn record(ts: f64, frame: &[u8]) -> FrameRecord {
        FrameRecord::from_dot11(Some(ts), frame)
    }

    #[test]
    fn classifies_deauth_and_disassoc() {
        let deauth = classify(&record(1.5, &mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA))).unwrap();
        assert_eq!(deauth.kind, EventKind::Deauth);
        assert_eq!(deauth.timestamp, 1.5);
        assert_eq!(deauth.source, SourceId::Mac(AP));
        assert_eq!(deauth.dest, Some(STA));

        let disassoc =
            classify(&record(2.0, &mgmt_frame(SUBTYPE_DISASSOCIATION, STA, AP))).unwrap();
        assert_eq!(disassoc.kind, EventKind::Disassoc);
        assert_eq!(disassoc.source, SourceId::Mac(STA));
    }

    #[test]
    fn classifies_eapol_data() {
        let event = classify(&record(3.0, &eapol_frame(false))).unwrap();
        assert_eq!(event.kind, EventKind::EapolObserved);
        assert_eq!(event.source, SourceId::Mac(AP));

        let wired = FrameRecord {
            timestamp: Some(3.0),
            header: None,
            eapol: true,
        };
        let event = classify(&wired).unwrap();
        assert_eq!(event.kind, EventKind::EapolObserved);
        assert_eq!(event.source, SourceId::Unknown);
    }

    #[test]
    fn ignores_other_frames() {
        // Beacon
        assert_eq!(classify(&record(1.0, &mgmt_frame(8, AP, STA))), None);
        // Authentication
        assert_eq!(classify(&record(1.0, &mgmt_frame(11, AP, STA))), None);
        assert_eq!(classify(&FrameRecord::opaque(Some(1.0))), None);
    }

    #[test]
    fn missing_transmitter_is_unknown() {
        let frame = mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA);
        let event = classify(&record(1.0, &frame[..10])).unwrap();
        assert_eq!(event.source, SourceId::Unknown);
        assert!(!event.source.is_known());
        assert_eq!(event.source.to_string(), "unknown");
        assert_ne!(SourceId::Unknown, SourceId::Mac(MacAddress::default()));
    }

    #[test]
    fn bad_timestamps_are_skipped() {
        let frame = mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA);
        let missing = FrameRecord::from_dot11(None, &frame);
        assert_eq!(frame_timestamp(&missing), Err(FrameAnomaly::MissingTimestamp));
        assert_eq!(classify(&missing), None);

        let nan = FrameRecord::from_dot11(Some(f64::NAN), &frame);
        assert!(matches!(
            frame_timestamp(&nan),
            Err(FrameAnomaly::NonFiniteTimestamp(_))
        ));
        assert_eq!(classify(&nan), None);
        assert_eq!(classify(&FrameRecord::from_dot11(Some(f64::INFINITY), &frame)), None);
    }

    #[test]
    fn kind_labels_match_report_vocabulary() {
        let labels: Vec<String> = EventKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(labels, ["DEAUTH", "DISASSOC", "EAPOL"]);
    }
}
