use super::*;
use crate::clock::ManualClock;
use crate::hardware::{MemoryLeds, MemorySwitch};
use crate::transport::MemoryTransport;
use std::io::Write;

const CONFIG: &str = r#"
midi:
  input_port: "Amp"
  output_port: "Amp"
  channel: 2

options:
  update_interval_ms: 100

device:
  manufacturer_id: [0x00, 0x20, 0x33]

parameters:
  - name: rig
    request: [0x02, 0x7F, 0x02, 0x00, 0x00, 0x01]
    response: [0x02, 0x7F, 0x01, 0x00, 0x00, 0x01]
  - name: drive
    cc: 17
    request: [0x02, 0x7F, 0x02, 0x00, 0x06, 0x11]
    response: [0x02, 0x7F, 0x01, 0x00, 0x06, 0x11]
  - name: rig_name
    kind: text
    request: [0x02, 0x7F, 0x03, 0x00, 0x00, 0x10]
    response: [0x02, 0x7F, 0x01, 0x00, 0x00, 0x10]

leds:
  pixel_count: 6

labels:
  - name: top
  - name: switch_a
    back_color: [0, 0, 80]

displays:
  - label: top
    parameter: rig
    format: "Rig {}"
  - label: switch_a
    content:
      mapping: drive
      mode: greater
      ref: 0
      yes: { text: "DRIVE", back_color: [200, 0, 0] }
      no: { text: "clean" }

switches:
  - name: A
    pedal_cc: 80
    pixels: [0, 1, 2]
    actions:
      - type: push_button
        mode: latch
        mapping: drive
        value_on: 127
        color: [255, 80, 0]
        label: switch_a
        enable_when:
          mapping: rig
          mode: in_range
          ref: [0, 3]
          yes: true
          no: false
"#;

fn with_bidirectional(pushed: &str) -> String {
    CONFIG.replace(
        "  manufacturer_id: [0x00, 0x20, 0x33]\n",
        &format!(
            "  manufacturer_id: [0x00, 0x20, 0x33]\n  bidirectional:\n    beacon: [0x02, 0x7F, 0x7E, 0x00, 0x00, 0x7E]\n    sensing: [0x02, 0x7F, 0x7E, 0x00, 0x00, 0x7F]\n    pushed: [{}]\n",
            pushed
        ),
    )
}

#[test]
fn test_parse_full_config() {
    let config = AppConfig::parse(CONFIG).unwrap();

    assert_eq!(config.midi.channel, 2);
    assert_eq!(config.midi.client_name, "footctl");
    assert_eq!(config.options.update_interval_ms, 100);
    assert_eq!(config.options.max_messages_per_tick, DEFAULT_MAX_MESSAGES_PER_TICK);
    assert_eq!(config.device.address_window, [2, 6]);
    assert_eq!(config.parameters[2].kind, ValueKind::Text);
    assert_eq!(config.labels[1].back_color, Rgb(0, 0, 80));

    let ActionConfig::PushButton(action) = &config.switches[0].actions[0];
    assert_eq!(action.value_on, Value::Number(127));
    assert_eq!(action.value_off, Value::Number(0));
    match &action.enable_when {
        Some(SubjectConfig::Condition(condition)) => {
            assert_eq!(condition.reference, Reference::Bounds([0, 3]));
            assert!(matches!(condition.yes, SubjectConfig::Value(true)));
        }
        other => panic!("unexpected enable_when: {:?}", other),
    }
    assert!(matches!(config.displays[1], DisplayConfig::Condition { .. }));
}

#[test]
fn test_rejects_invalid_channel() {
    let err = AppConfig::parse(&CONFIG.replace("channel: 2", "channel: 17")).unwrap_err();
    assert!(err.to_string().contains("Invalid MIDI channel"));
}

#[test]
fn test_rejects_unknown_parameter() {
    let err = AppConfig::parse(&CONFIG.replace("parameter: rig", "parameter: volume")).unwrap_err();
    assert!(err.to_string().contains("Unknown parameter 'volume'"));
}

#[test]
fn test_rejects_unknown_mode() {
    let err = AppConfig::parse(&CONFIG.replace("mode: latch", "mode: toggle")).unwrap_err();
    assert!(format!("{:#}", err).contains("toggle"));
}

#[test]
fn test_rejects_pixel_out_of_range() {
    let err = AppConfig::parse(&CONFIG.replace("pixels: [0, 1, 2]", "pixels: [0, 6]")).unwrap_err();
    assert!(err.to_string().contains("uses pixel 6"));
}

#[test]
fn test_rejects_unknown_pushed_parameter() {
    assert!(AppConfig::parse(&with_bidirectional("rig")).is_ok());
    assert!(AppConfig::parse(&with_bidirectional("tempo")).is_err());
}

#[tokio::test]
async fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = AppConfig::load(&path).await.unwrap();
    assert_eq!(config.switches.len(), 1);

    assert!(AppConfig::load("/nonexistent/footctl.yaml").await.is_err());
}

#[test]
fn test_control_change_parameter_uses_configured_channel() {
    let config = AppConfig::parse(CONFIG).unwrap();
    let setup = Setup::new(&config);

    let drive = setup.parameter("drive").unwrap();
    assert_eq!(
        drive.borrow().set,
        Some(MidiMessage::ControlChange { channel: 1, control: 17, value: 0 })
    );
    assert!(setup.parameter("volume").is_err());
}

#[test]
fn test_build_controller() {
    let config = AppConfig::parse(CONFIG).unwrap();
    let setup = Setup::new(&config);
    let clock = ManualClock::new(0);
    let (local, mut remote) = MemoryTransport::pair();
    let pedal = MemorySwitch::new();

    let client = setup.client(Box::new(local), Rc::new(clock.clone())).unwrap();
    let mut controller = setup
        .build(
            client,
            Rc::new(clock.clone()),
            Box::new(MemoryLeds::new(6)),
            |switch| {
                assert_eq!(switch.pedal_cc, 80);
                Ok(Box::new(pedal.clone()) as Box<dyn SwitchDriver>)
            },
        )
        .unwrap();

    assert_eq!(controller.switches().len(), 1);
    assert_eq!(controller.labels().len(), 2);

    // Display, conditions and read-back share one read per parameter
    controller.tick();
    assert_eq!(
        remote.drain(),
        vec![
            Setup::sysex(&config, &[0x02, 0x7F, 0x02, 0x00, 0x00, 0x01]),
            Setup::sysex(&config, &[0x02, 0x7F, 0x02, 0x00, 0x06, 0x11]),
        ]
    );
}

#[test]
fn test_unvalidated_channel_does_not_underflow() {
    let mut config = AppConfig::parse(CONFIG).unwrap();
    config.midi.channel = 0;
    let setup = Setup::new(&config);

    assert_eq!(
        setup.parameter("drive").unwrap().borrow().set,
        Some(MidiMessage::ControlChange { channel: 0, control: 17, value: 0 })
    );
}

#[test]
fn test_build_bidirectional_client() {
    let config = AppConfig::parse(&with_bidirectional("rig, drive")).unwrap();
    let setup = Setup::new(&config);
    let (local, _remote) = MemoryTransport::pair();

    assert!(setup
        .client(Box::new(local), Rc::new(ManualClock::new(0)))
        .is_ok());
}
