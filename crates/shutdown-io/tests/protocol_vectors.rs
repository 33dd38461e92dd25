use shutdown_io::protocol::{ErrorCode, IncomingMessage, ProtocolVersion};

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "protocol_version":{"major":1,"minor":2},
        "capabilities":["waveform.v1","events.v1"],
        "client_id":"test-bench"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert_eq!(hello.client_id.as_deref(), Some("test-bench"));
            assert_eq!(hello.capabilities.len(), 2);
        }
        other => panic!("expected hello message, got {other:?}"),
    }
}

#[test]
fn parses_start_message_with_full_parameters() {
    let raw = r#"{
        "type":"start",
        "protocol_version":{"major":1,"minor":0},
        "params":{
            "input_voltage":750.0,
            "input_current":12.5,
            "temperature":-10.0,
            "light_intensity":1000.0
        }
    }"#;

    let msg = IncomingMessage::parse(raw).expect("start should parse");
    match msg {
        IncomingMessage::Start(start) => {
            let params = start.params.expect("params present");
            assert_eq!(params.input_voltage, 750.0);
            assert_eq!(params.temperature, -10.0);
        }
        other => panic!("expected start message, got {other:?}"),
    }
}

#[test]
fn start_without_params_reuses_staged_values() {
    match IncomingMessage::parse(r#"{"type":"start"}"#).unwrap() {
        IncomingMessage::Start(start) => assert!(start.params.is_none()),
        other => panic!("expected start message, got {other:?}"),
    }
}

#[test]
fn negative_current_never_reaches_a_session() {
    let err = IncomingMessage::parse(r#"{"type":"start","params":{"input_current":-1.0}}"#)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidParameters);
}

#[test]
fn minor_versions_are_compatible() {
    assert!(ProtocolVersion { major: 1, minor: 9 }.is_supported());
    assert!(!ProtocolVersion { major: 0, minor: 1 }.is_supported());
    assert!(IncomingMessage::parse(
        r#"{"type":"reset","protocol_version":{"major":1,"minor":9}}"#
    )
    .is_ok());
}
