//! JSON wire-format stability for the shared record types.

use gwc_common::{Coincidence, GpsTime, NetworkConfig, Trigger, TriggerId, TimeSlideId};

fn trigger(id: u64, aux: Option<Vec<u8>>) -> Trigger {
    Trigger {
        id: TriggerId(id),
        ifo: "H1".into(),
        end: GpsTime::new(1_234_567_890, 123_456_789),
        snr: 9.5,
        chisq: 1.8,
        chisq_dof: 10,
        template_id: 42,
        aux,
    }
}

#[test]
fn test_trigger_round_trip_preserves_nanoseconds() {
    let t = trigger(7, None);
    let json = serde_json::to_string(&t).unwrap();
    let back: Trigger = serde_json::from_str(&json).unwrap();
    assert_eq!(back, t);
    assert_eq!(back.end.nanoseconds, 123_456_789);
}

#[test]
fn test_absent_aux_is_omitted_from_json() {
    let json = serde_json::to_string(&trigger(1, None)).unwrap();
    assert!(!json.contains("aux"), "empty aux serialized: {json}");
    let json = serde_json::to_string(&trigger(1, Some(vec![1, 2, 3]))).unwrap();
    assert!(json.contains("aux"));
}

#[test]
fn test_coincidence_round_trip() {
    let coinc = Coincidence::new(vec![trigger(1, None), trigger(2, None)], TimeSlideId(3));
    let json = serde_json::to_string(&coinc).unwrap();
    let back: Coincidence = serde_json::from_str(&json).unwrap();
    assert_eq!(back, coinc);
    assert!(!back.is_zero_lag());
}

#[test]
fn test_network_config_round_trip() {
    let cfg = NetworkConfig::hlv(0.005);
    let json = serde_json::to_string(&cfg).unwrap();
    let back: NetworkConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);
    back.validate().unwrap();
}
