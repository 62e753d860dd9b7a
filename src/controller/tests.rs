//! Tests for the Controller

use super::*;
use crate::midi::MessageKind;
use crate::params::{ControlKind, Parameter, Target};
use crate::ports::memory::MemoryHandle;
use crate::ports::MemoryBackend;
use std::time::Instant;
use tokio::sync::mpsc;

fn make_controller(options: ControllerOptions) -> (Controller, MemoryHandle, mpsc::Receiver<InboundMessage>) {
    let backend = MemoryBackend::new();
    let handle = backend.handle();
    handle.add_port(PortDirection::Input, "in-1", "Elektron Digitakt");
    handle.add_port(PortDirection::Output, "out-1", "Elektron Digitakt");

    let (tx, rx) = mpsc::channel(64);
    let ports = PortManager::new(Box::new(backend), tx);
    let params = ParameterTable::default_table().unwrap();
    let mut controller = Controller::new(params, ports, options);
    controller.refresh_ports().unwrap();
    (controller, handle, rx)
}

fn connected(options: ControllerOptions) -> (Controller, MemoryHandle, mpsc::Receiver<InboundMessage>) {
    let (mut controller, handle, rx) = make_controller(options);
    controller.select_output(Some("digitakt")).unwrap();
    controller.select_input(Some("in-1")).unwrap();
    controller.log_mut().clear();
    (controller, handle, rx)
}

fn sent_bytes(handle: &MemoryHandle) -> Vec<Vec<u8>> {
    handle.sent().into_iter().map(|(_, bytes)| bytes).collect()
}

fn inbound(data: &[u8]) -> InboundMessage {
    InboundMessage {
        port_id: "in-1".to_string(),
        data: data.to_vec(),
        received: Instant::now(),
    }
}

fn error_entries(controller: &Controller) -> usize {
    controller
        .log()
        .entries()
        .filter(|e| e.direction == Direction::Error)
        .count()
}

#[test]
fn test_refresh_logs_port_arrivals() {
    let (controller, _handle, _rx) = make_controller(ControllerOptions::default());

    let summaries: Vec<_> = controller.log().entries().map(|e| e.summary.clone()).collect();
    assert!(summaries.contains(&"Input device \"Elektron Digitakt\" connected".to_string()));
    assert!(summaries.contains(&"Output device \"Elektron Digitakt\" connected".to_string()));
}

#[test]
fn test_send_without_output_logs_one_error() {
    let (mut controller, handle, _rx) = make_controller(ControllerOptions::default());
    controller.log_mut().clear();

    let result = controller.set_parameter("filter.freq", 100);

    assert_eq!(result, Err(MidiError::NoOutputSelected));
    assert_eq!(controller.log().len(), 1);
    assert_eq!(error_entries(&controller), 1);
    assert_eq!(
        controller.log().latest().map(|e| e.summary.as_str()),
        Some("No output device selected")
    );
    assert!(handle.sent().is_empty());
    // The value is stored even though nothing went out
    assert_eq!(controller.params().get("filter.freq").unwrap().value(), 100);
}

#[test]
fn test_nrpn_without_output_logs_one_error() {
    let (mut controller, _handle, _rx) = make_controller(ControllerOptions {
        nrpn_mode: true,
        ..Default::default()
    });
    controller.log_mut().clear();

    assert_eq!(
        controller.send_nrpn(0, 128, 64),
        Err(MidiError::NoOutputSelected)
    );
    assert_eq!(error_entries(&controller), 1);
    assert_eq!(controller.log().len(), 1);
}

#[test]
fn test_set_parameter_sends_cc_and_clamps() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());

    let (stored, format) = controller.set_parameter("filter.freq", 500).unwrap();

    assert_eq!(stored, 127);
    assert_eq!(format, WireFormat::Cc);
    assert_eq!(sent_bytes(&handle), vec![vec![0xB0, 74, 127]]);

    let entry = controller.log().latest().unwrap();
    assert_eq!(entry.direction, Direction::Out);
    assert_eq!(entry.kind, Some(MessageKind::ControlChange));
}

#[test]
fn test_set_parameter_nrpn_mode() {
    let (mut controller, handle, _rx) = connected(ControllerOptions {
        nrpn_mode: true,
        ..Default::default()
    });

    let (_, format) = controller.set_parameter("midi_track.val1", 100).unwrap();

    assert_eq!(format, WireFormat::Nrpn);
    // NRPN 184 = MSB 1, LSB 56; channel 9 status is 0xB8
    assert_eq!(
        sent_bytes(&handle),
        vec![
            vec![0xB8, 99, 1],
            vec![0xB8, 98, 56],
            vec![0xB8, 6, 0],
            vec![0xB8, 38, 100],
        ]
    );
    assert_eq!(controller.log().len(), 4);
}

#[test]
fn test_nrpn_mode_falls_back_to_cc_without_nrpn_number() {
    let mut table = ParameterTable::default();
    let param = Parameter::new(
        "cutoff",
        "Cutoff",
        ControlKind::Knob,
        Target {
            channel: 2,
            cc: Some(74),
            nrpn: None,
        },
        (0, 127, 0),
    )
    .unwrap();
    table.insert("synth", "Synth", 2, param).unwrap();

    let backend = MemoryBackend::new();
    let handle = backend.handle();
    handle.add_port(PortDirection::Output, "out", "Synth");
    let (tx, _rx) = mpsc::channel(4);

    let mut sent = Vec::new();
    for nrpn_mode in [false, true] {
        handle.clear_sent();
        let ports = PortManager::new(Box::new(backend.clone()), tx.clone());
        let mut controller = Controller::new(
            table.clone(),
            ports,
            ControllerOptions {
                nrpn_mode,
                ..Default::default()
            },
        );
        controller.refresh_ports().unwrap();
        controller.select_output(Some("out")).unwrap();

        let (_, format) = controller.set_parameter("synth.cutoff", 90).unwrap();
        assert_eq!(format, WireFormat::Cc);
        sent.push(sent_bytes(&handle));
    }

    assert_eq!(sent[0], sent[1]);
    assert_eq!(sent[0], vec![vec![0xB2, 74, 90]]);
}

#[test]
fn test_nrpn_only_parameter_always_uses_nrpn() {
    let mut table = ParameterTable::default();
    let param = Parameter::new(
        "tune",
        "Fine Tune",
        ControlKind::Knob,
        Target {
            channel: 0,
            cc: None,
            nrpn: Some(300),
        },
        (0, 1000, 500),
    )
    .unwrap();
    table.insert("osc", "Oscillator", 0, param).unwrap();

    let backend = MemoryBackend::new();
    let handle = backend.handle();
    handle.add_port(PortDirection::Output, "out", "Synth");
    let (tx, _rx) = mpsc::channel(4);
    let mut controller = Controller::new(
        table,
        PortManager::new(Box::new(backend), tx),
        ControllerOptions::default(),
    );
    controller.refresh_ports().unwrap();
    controller.select_output(Some("out")).unwrap();

    let (stored, format) = controller.set_parameter("osc.tune", 700).unwrap();
    assert_eq!(stored, 700);
    assert_eq!(format, WireFormat::Nrpn);
    assert_eq!(handle.sent().len(), 4);
    // 700 = MSB 5, LSB 60
    assert_eq!(sent_bytes(&handle)[2], vec![0xB0, 6, 5]);
    assert_eq!(sent_bytes(&handle)[3], vec![0xB0, 38, 60]);
}

#[test]
fn test_transport_failure_mid_nrpn() {
    let (mut controller, handle, _rx) = connected(ControllerOptions {
        nrpn_mode: true,
        ..Default::default()
    });
    handle.fail_sends_after(2);

    let result = controller.send_nrpn(0, 128, 64);

    match result {
        Err(MidiError::NrpnInterrupted { step, .. }) => assert_eq!(step, 3),
        other => panic!("expected NrpnInterrupted, got {:?}", other),
    }
    // Messages after the failed one are not attempted
    assert_eq!(handle.sent().len(), 2);
    assert_eq!(error_entries(&controller), 1);
    // Output selection survives a transport error
    assert!(controller.ports().selected_output().is_some());
}

#[test]
fn test_transport_failure_on_cc() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());
    handle.fail_sends_after(0);

    let result = controller.send_cc(0, 74, 10);
    assert!(matches!(result, Err(MidiError::Transport(_))));
    let entry = controller.log().latest().unwrap();
    assert_eq!(entry.direction, Direction::Error);
    assert!(entry.summary.starts_with("Failed to send MIDI message"));
}

#[test]
fn test_invalid_range_is_reported() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());

    assert!(matches!(
        controller.send_cc(16, 1, 1),
        Err(MidiError::InvalidRange { field: "channel", .. })
    ));
    assert!(handle.sent().is_empty());
    assert_eq!(error_entries(&controller), 1);
}

#[test]
fn test_unknown_parameter() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());
    assert_eq!(
        controller.set_parameter("filter.nope", 1),
        Err(MidiError::UnknownParameter("filter.nope".to_string()))
    );
}

#[test]
fn test_inbound_cc_updates_parameter() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());

    let updated = controller.handle_inbound(inbound(&[0xB0, 75, 99]));

    assert_eq!(updated, 1);
    assert_eq!(controller.params().get("filter.res").unwrap().value(), 99);
    let entry = controller.log().latest().unwrap();
    assert_eq!(entry.direction, Direction::In);
    assert_eq!(entry.summary, "Control Change: channel 1, controller 75, value 99");
}

#[test]
fn test_inbound_cc_is_clamped() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());

    controller.handle_inbound(inbound(&[0xB0, 76, 127]));
    assert_eq!(controller.params().get("filter.type").unwrap().value(), 1);
}

#[test]
fn test_inbound_nrpn_updates_parameter() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());

    // NRPN 193 (delay.feedback) = MSB 1, LSB 65
    for bytes in [[0xB0, 99, 1], [0xB0, 98, 65], [0xB0, 6, 0], [0xB0, 38, 77]] {
        controller.handle_inbound(inbound(&bytes));
    }

    assert_eq!(controller.params().get("delay.feedback").unwrap().value(), 77);
    assert_eq!(controller.log().len(), 4);
}

#[test]
fn test_malformed_inbound_is_logged_not_errored() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());

    assert_eq!(controller.handle_inbound(inbound(&[0x90, 60])), 0);
    controller.handle_inbound(inbound(&[]));

    assert_eq!(error_entries(&controller), 0);
    let kinds: Vec<_> = controller.log().entries().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![Some(MessageKind::Empty), Some(MessageKind::Unknown)]);
}

#[tokio::test]
async fn test_input_handler_feeds_event_loop() {
    let (mut controller, handle, mut rx) = connected(ControllerOptions::default());

    handle.inject("in-1", &[0x90, 60, 64]);
    let message = rx.recv().await.unwrap();
    controller.handle_inbound(message);

    assert_eq!(
        controller.log().latest().map(|e| e.summary.as_str()),
        Some("Note On: channel 1, note C4, velocity 64")
    );
}

#[test]
fn test_vendor_note_names() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions {
        vendor_note_names: true,
        ..Default::default()
    });

    controller.handle_inbound(inbound(&[0x98, 60, 100]));
    assert_eq!(
        controller.log().latest().map(|e| e.summary.as_str()),
        Some("Note On: channel 9, note C4, velocity 100 (MIDI track)")
    );

    controller.handle_inbound(inbound(&[0x90, 60, 100]));
    assert_eq!(
        controller.log().latest().map(|e| e.summary.as_str()),
        Some("Note On: channel 1, note C4, velocity 100")
    );
}

#[test]
fn test_select_unknown_output_clears_selection() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());

    let result = controller.select_output(Some("moog"));
    assert!(matches!(result, Err(MidiError::PortNotFound { .. })));
    assert!(controller.ports().selected_output().is_none());
    assert_eq!(error_entries(&controller), 1);
}

#[test]
fn test_unplugged_output_is_deselected_and_logged() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());

    handle.remove_port(PortDirection::Output, "out-1");
    let changes = controller.refresh_ports().unwrap();

    assert_eq!(changes.len(), 1);
    assert!(controller.ports().selected_output().is_none());
    let summaries: Vec<_> = controller.log().entries().map(|e| e.summary.clone()).collect();
    assert!(summaries.contains(&"Output device \"Elektron Digitakt\" disconnected".to_string()));
    assert!(summaries.contains(&"Output deselected: Elektron Digitakt is gone".to_string()));

    assert_eq!(
        controller.set_parameter("filter.freq", 1),
        Err(MidiError::NoOutputSelected)
    );
}

#[test]
fn test_note_and_program_change() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());

    controller.send_note(9, 36, 100).unwrap();
    controller.send_note(9, 36, 0).unwrap();
    controller.send_program_change(0, 5).unwrap();

    assert_eq!(
        sent_bytes(&handle),
        vec![vec![0x99, 36, 100], vec![0x89, 36, 0], vec![0xC0, 5]]
    );
}

#[test]
fn test_snapshot_restore_and_table_replace() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());
    controller.set_parameter("reverb.mix", 90).unwrap();

    let snapshot = controller.snapshot();
    controller.reset_parameters();
    assert_eq!(controller.params().get("reverb.mix").unwrap().value(), 0);

    assert_eq!(controller.restore(&snapshot), 24);
    assert_eq!(controller.params().get("reverb.mix").unwrap().value(), 90);

    controller.replace_parameters(ParameterTable::default_table().unwrap());
    assert_eq!(controller.params().get("reverb.mix").unwrap().value(), 90);
}

#[test]
fn test_apply_options() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());
    for i in 0..20 {
        controller.handle_inbound(inbound(&[0xF8]));
        assert!(controller.log().len() <= i + 1);
    }

    controller.apply_options(ControllerOptions {
        nrpn_mode: true,
        vendor_note_names: false,
        log_capacity: 5,
    });

    assert!(controller.nrpn_mode());
    assert_eq!(controller.log().len(), 5);
    assert!(!controller.toggle_nrpn_mode());
}

#[test]
fn test_replugged_output_is_reconnected() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());

    handle.remove_port(PortDirection::Output, "out-1");
    controller.refresh_ports().unwrap();
    assert_eq!(
        controller.set_parameter("filter.freq", 10),
        Err(MidiError::NoOutputSelected)
    );

    handle.add_port(PortDirection::Output, "out-1", "Elektron Digitakt");
    controller.refresh_ports().unwrap();

    assert_eq!(
        controller.ports().selected_output().map(|p| p.id.as_str()),
        Some("out-1")
    );
    let summaries: Vec<_> = controller.log().entries().map(|e| e.summary.clone()).collect();
    assert!(summaries.contains(&"Reconnected to output: Elektron Digitakt".to_string()));

    controller.set_parameter("filter.freq", 10).unwrap();
    assert_eq!(sent_bytes(&handle), vec![vec![0xB0, 74, 10]]);
}

#[test]
fn test_repeated_enumeration_failure_is_logged_once() {
    let (mut controller, handle, _rx) = connected(ControllerOptions::default());
    controller.handle_inbound(inbound(&[0x90, 60, 100]));

    handle.fail_enumeration(Some("MIDI service unavailable"));
    for _ in 0..100 {
        assert!(controller.refresh_ports().is_err());
    }

    assert_eq!(error_entries(&controller), 1);
    assert_eq!(controller.log().stats().errors.len(), 1);
    assert!(controller
        .log()
        .entries()
        .any(|e| e.direction == Direction::In && e.kind == Some(MessageKind::NoteOn)));

    handle.fail_enumeration(None);
    controller.refresh_ports().unwrap();
    assert_eq!(
        controller.log().latest().map(|e| e.summary.as_str()),
        Some("Port enumeration recovered")
    );

    // A new outage is reported again
    handle.fail_enumeration(Some("MIDI service unavailable"));
    assert!(controller.refresh_ports().is_err());
    assert_eq!(error_entries(&controller), 2);
}

#[test]
fn test_inbound_timing_uses_receipt_time() {
    let (mut controller, _handle, _rx) = connected(ControllerOptions::default());
    let start = Instant::now();
    controller.log_mut().reset_timing();

    for ms in [0, 20] {
        let mut message = inbound(&[0xF8]);
        message.received = start + std::time::Duration::from_millis(ms);
        controller.handle_inbound(message);
    }

    let average = controller.log().stats().average_gap_ms().unwrap();
    assert!((average - 20.0).abs() < 1e-9, "average gap {}", average);
}
