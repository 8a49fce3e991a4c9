//! Tests for the controller tick loop

use super::*;
use crate::action::{ActionCore, ParameterTarget, PushButtonAction, PushButtonMode};
use crate::client::{Client, ClientOptions};
use crate::clock::ManualClock;
use crate::condition::{ChangeFlag, Comparison, ConditionTree, Subject};
use crate::display::{LabelPlacement, ParameterDisplay, Rgb};
use crate::hardware::{MemoryLeds, MemorySwitch, SwitchDriver};
use crate::mapping::{Mapping, MappingHandle, Value};
use crate::midi::MidiMessage;
use crate::provider::SysExValueProvider;
use crate::transport::{MemoryTransport, MidiTransport};
use std::cell::RefCell;

fn sysex(data: &[u8]) -> MidiMessage {
    MidiMessage::SystemExclusive {
        manufacturer_id: vec![0x00, 0x20, 0x33],
        data: data.to_vec(),
    }
}

fn param(name: &str, address: u8) -> MappingHandle {
    Mapping::new(name)
        .with_set(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x06, address, 0x00, 0x00]))
        .with_request(sysex(&[0x02, 0x7F, 0x02, 0x00, 0x06, address]))
        .with_response(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x06, address]))
        .into_handle()
}

fn answer(address: u8, value: u8) -> MidiMessage {
    sysex(&[0x02, 0x7F, 0x01, 0x00, 0x06, address, 0x00, value])
}

fn is_request(message: &MidiMessage) -> bool {
    matches!(message, MidiMessage::SystemExclusive { data, .. } if data.get(2) == Some(&0x02))
}

struct Rig {
    clock: ManualClock,
    remote: MemoryTransport,
    leds: Rc<RefCell<MemoryLeds>>,
    controller: Controller,
}

fn rig(options: ControllerOptions) -> Rig {
    let clock = ManualClock::new(0);
    let (local, remote) = MemoryTransport::pair();
    let client = Client::new(
        Box::new(local),
        Box::new(SysExValueProvider::default()),
        Rc::new(clock.clone()),
        ClientOptions::default(),
    );
    let leds = Rc::new(RefCell::new(MemoryLeds::new(4)));
    let controller = Controller::new(
        Box::new(client),
        Rc::new(clock.clone()),
        Box::new(leds.clone()),
        Labels::new(),
        options,
    );

    Rig {
        clock,
        remote,
        leds,
        controller,
    }
}

impl Rig {
    fn tick_at(&mut self, ms: u64) -> TickResult {
        self.clock.set(ms);
        self.controller.tick()
    }
}

/// Counts how often it is polled
struct CountingSwitch(Rc<Cell<usize>>);

impl SwitchDriver for CountingSwitch {
    fn pushed(&mut self) -> bool {
        self.0.set(self.0.get() + 1);
        false
    }
}

#[test]
fn test_message_cap_interleaves_switch_polls() {
    let mut rig = rig(ControllerOptions::default());
    let polls = Rc::new(Cell::new(0));
    rig.controller
        .add_switch(Switch::new("A", Box::new(CountingSwitch(polls.clone())), vec![]));
    rig.controller.init().unwrap();
    polls.set(0);

    for value in 0..25 {
        rig.remote.send(&MidiMessage::ControlChange { channel: 0, control: 1, value });
    }

    rig.tick_at(0);
    assert_eq!(polls.get(), 10);
    rig.tick_at(1);
    assert_eq!(polls.get(), 20);

    // 5 left: five polls with a message, one that finds the queue empty
    rig.tick_at(2);
    assert_eq!(polls.get(), 26);
    rig.tick_at(3);
    assert_eq!(polls.get(), 27);
}

#[test]
fn test_periodic_update_interval() {
    let mut rig = rig(ControllerOptions::default());
    let gain = param("gain", 1);
    let tree = ConditionTree::single(
        "gain",
        Subject::when(gain.clone(), Comparison::Less(64), Subject::Value("low"), Subject::Value("high")),
    )
    .unwrap()
    .into_shared();
    let flag = ChangeFlag::shared();
    tree.borrow_mut().add_listener(flag.clone());
    rig.controller.add_updater(Box::new(tree.clone()));
    rig.controller.init().unwrap();

    rig.tick_at(0);
    assert_eq!(rig.remote.drain().len(), 1);

    rig.remote.send(&answer(1, 100));
    rig.tick_at(50);
    assert!(flag.borrow_mut().take());
    assert_eq!(tree.borrow().value(), Some(&"high"));

    rig.tick_at(199);
    assert_eq!(rig.remote.pending(), 0);

    rig.tick_at(200);
    assert_eq!(rig.remote.drain().len(), 1);
}

#[test]
fn test_timeouts_fire_without_inbound_traffic() {
    let mut rig = rig(ControllerOptions::default());
    let display = ParameterDisplay::new(param("gain", 1), 0).into_shared();
    rig.controller.labels_mut().register(&LabelPlacement {
        name: "gain".into(),
        back_color: Rgb::BLACK,
        brightness: 1.0,
    });
    rig.controller.add_updater(Box::new(display.clone()));
    rig.controller.add_display(display.clone());
    rig.controller.init().unwrap();

    rig.tick_at(0);
    rig.remote.send(&answer(1, 7));
    rig.tick_at(10);
    rig.tick_at(200);
    assert_eq!(rig.controller.labels().get(0).unwrap().text, "7");

    // Read sent at 200 is never answered
    let sent = rig.remote.drain();
    assert_eq!(sent.iter().filter(|m| is_request(m)).count(), 2);
    for ms in (400..=2200).step_by(200) {
        rig.tick_at(ms);
    }
    assert_eq!(rig.remote.drain().len(), 0);

    rig.tick_at(2201);
    rig.tick_at(2400);
    assert_eq!(rig.controller.labels().get(0).unwrap().text, "Offline");
    assert_eq!(rig.remote.drain().len(), 1);
}

#[test]
fn test_push_button_round_trip() {
    let mut rig = rig(ControllerOptions::default());
    let level = MemorySwitch::new();
    let bypass = param("bypass", 2);
    let action = PushButtonAction::new(
        ActionCore::new("bypass"),
        PushButtonMode::Latch,
        Box::new(ParameterTarget::new(bypass, Value::Number(1), Value::Number(0))),
    )
    .with_color(Rgb(0, 200, 0));
    rig.controller.add_switch(
        Switch::new("A", Box::new(level.clone()), vec![0, 1]).with_action(Box::new(action)),
    );
    rig.controller.init().unwrap();

    rig.tick_at(0);
    assert!(rig.remote.drain().iter().all(is_request));

    level.set(true);
    rig.tick_at(10);
    assert_eq!(
        rig.remote.drain(),
        vec![sysex(&[0x02, 0x7F, 0x01, 0x00, 0x06, 0x02, 0x00, 0x01])]
    );
    assert_eq!(rig.leds.borrow().pixels()[0], Rgb(0, 200, 0));

    // Answer to the read sent before the push is stale
    rig.remote.send(&answer(2, 0));
    rig.tick_at(20);
    rig.tick_at(200);
    assert_eq!(rig.leds.borrow().pixels()[0], Rgb(0, 200, 0));

    // Device reports "off" after all: adopted without transmitting
    rig.remote.send(&answer(2, 0));
    rig.tick_at(210);
    rig.tick_at(400);

    assert!(rig.remote.drain().iter().all(is_request));
    assert_eq!(rig.leds.borrow().pixels()[0], Rgb(0, 20, 0));
}

#[test]
fn test_stop_handle() {
    let mut rig = rig(ControllerOptions::default());
    rig.controller.init().unwrap();
    let stop = rig.controller.stop_handle();

    assert_eq!(rig.tick_at(0), TickResult::Continue);
    stop.stop();
    assert_eq!(rig.tick_at(1), TickResult::Stop);
    assert_eq!(rig.controller.ticks(), 1);
}

#[test]
fn test_measurement_does_not_change_behavior() {
    let mut rig = rig(ControllerOptions {
        measure_tick_time: true,
        measurement_interval_ms: 10,
        ..Default::default()
    });
    rig.controller.init().unwrap();

    for ms in 0..30 {
        assert_eq!(rig.tick_at(ms), TickResult::Continue);
    }
    assert_eq!(rig.controller.ticks(), 30);
}
