mod common;

use ble_serial::infrastructure::bluetooth::backend::{CharRole, SetupError, WriteError};
use ble_serial::{BleDevice, ConnectionState, SerialDevice};
use common::{Recorder, ScanScript, ScriptedBackend};
use std::sync::Arc;

use ConnectionState::*;

fn device(scan: ScanScript) -> (BleDevice<ScriptedBackend>, Arc<Recorder>) {
    let device = BleDevice::new(ScriptedBackend::new(scan));
    let recorder = Arc::new(Recorder::default());
    device.add_listener(recorder.clone());
    (device, recorder)
}

#[test]
fn test_connect_walks_through_discovery() {
    let (device, recorder) = device(ScanScript::Match);
    assert_eq!(device.state(), Disconnected);

    device.connect("Slider1");

    assert_eq!(recorder.states(), vec![Searching, Found, Connecting, Connected]);
    assert_eq!(device.state(), Connected);
    assert!(!device.can_connect());
}

#[test]
fn test_empty_scan_ends_not_found() {
    let (device, recorder) = device(ScanScript::Empty);

    device.connect("Ghost");

    assert_eq!(recorder.states(), vec![Searching, NotFound]);
    assert!(device.can_connect());
    assert!(device.error_message().is_none());
}

#[test]
fn test_retry_after_not_found() {
    let (device, recorder) = device(ScanScript::Manual);
    device.connect("Slider1");
    device.backend().finish_scan();
    assert_eq!(device.state(), NotFound);

    recorder.reset();
    device.connect("Slider1");
    device.backend().advertise("Slider1");
    assert_eq!(recorder.states(), vec![Searching, Found, Connecting, Connected]);
}

#[test]
fn test_double_disconnect_notifies_once() {
    let (device, recorder) = device(ScanScript::Match);
    device.connect("Slider1");
    recorder.reset();

    device.disconnect();
    device.disconnect();

    assert_eq!(recorder.states(), vec![Disconnecting, Disconnected]);
    assert_eq!(device.backend().releases(), 1);
}

#[test]
fn test_disconnect_when_idle_does_nothing() {
    let (device, recorder) = device(ScanScript::Match);
    device.disconnect();
    assert!(recorder.states().is_empty());
    assert_eq!(device.backend().releases(), 0);
}

#[test]
fn test_disconnect_while_searching() {
    let (device, recorder) = device(ScanScript::Manual);
    device.connect("Slider1");
    let scan = device.backend().scan_events().unwrap();

    device.disconnect();
    assert_eq!(recorder.states(), vec![Searching, Disconnecting, Disconnected]);

    // Late reports from the abandoned scan change nothing.
    scan.scan_completed();
    assert_eq!(device.state(), Disconnected);
}

#[test]
fn test_scan_end_after_match_is_ignored() {
    let device = Arc::new(BleDevice::new(ScriptedBackend::new(ScanScript::Match)));
    let recorder = Arc::new(Recorder::default());
    device.add_listener(recorder.clone());

    // The scan times out just as it is stopped for the matched peer.
    let weak = Arc::downgrade(&device);
    device.backend().on_next_stop_scan(move || {
        if let Some(device) = weak.upgrade() {
            device.backend().finish_scan();
        }
    });

    device.connect("Slider1");

    assert_eq!(recorder.states(), vec![Searching, Found, Connecting, Connected]);
}

#[test]
fn test_connect_during_release_keeps_new_link() {
    let device = Arc::new(BleDevice::new(ScriptedBackend::new(ScanScript::Match)));
    let recorder = Arc::new(Recorder::default());
    device.add_listener(recorder.clone());
    device.connect("Slider1");
    recorder.reset();

    let weak = Arc::downgrade(&device);
    device.backend().on_next_release(move || {
        if let Some(device) = weak.upgrade() {
            device.connect("Slider1");
        }
    });
    device.disconnect();

    assert_eq!(
        recorder.states(),
        vec![Disconnecting, Searching, Found, Connecting, Connected]
    );
    assert!(device.backend().link_events().is_some());
    assert!(device.write_str("A"));
}

#[test]
fn test_disconnect_cancels_scan_waiting_on_release() {
    let device = Arc::new(BleDevice::new(ScriptedBackend::new(ScanScript::Match)));
    device.connect("Slider1");

    let weak = Arc::downgrade(&device);
    device.backend().on_next_release(move || {
        if let Some(device) = weak.upgrade() {
            device.connect("Slider1");
            device.disconnect();
        }
    });
    device.disconnect();

    assert_eq!(device.state(), Disconnected);
    assert_eq!(device.backend().scans(), 1);
    assert!(device.backend().link_events().is_none());
}

#[test]
fn test_other_advertisers_are_ignored() {
    let (device, _recorder) = device(ScanScript::Manual);
    device.connect("Slider1");

    device.backend().advertise("Headphones");
    device.backend().advertise("Slider10");
    assert_eq!(device.state(), Searching);

    device.backend().advertise("Slider1");
    assert_eq!(device.state(), Connected);
}

#[test]
fn test_connect_ignored_unless_idle() {
    let (device, _recorder) = device(ScanScript::Match);
    device.connect("Slider1");
    device.connect("Slider2");

    assert_eq!(device.target().as_deref(), Some("Slider1"));
    assert_eq!(device.backend().scans(), 1);
}

#[test]
fn test_setup_failure_sets_error_and_disconnects() {
    let (device, recorder) = device(ScanScript::Match);
    device
        .backend()
        .fail_setup(SetupError::ServiceNotFound("Unreachable".to_string()));

    device.connect("Slider1");

    assert_eq!(
        recorder.states(),
        vec![Searching, Found, Connecting, Disconnecting, Disconnected]
    );
    assert_eq!(
        device.error_message().as_deref(),
        Some("Can't find service: Unreachable")
    );
}

#[test]
fn test_characteristic_failure_message() {
    let (device, _recorder) = device(ScanScript::Match);
    device.backend().fail_setup(SetupError::CharacteristicMissing {
        role: CharRole::Tx,
        status: "ProtocolError".to_string(),
    });

    device.connect("Slider1");

    assert_eq!(
        device.error_message().as_deref(),
        Some("Error getting TX characteristic: ProtocolError")
    );
}

#[test]
fn test_new_connect_clears_error() {
    let (device, _recorder) = device(ScanScript::Match);
    device.backend().fail_setup(SetupError::RadioOff);
    device.connect("Slider1");
    assert!(device.error_message().is_some());

    device.backend().succeed_setup();
    device.connect("Slider1");
    assert!(device.error_message().is_none());
    assert_eq!(device.state(), Connected);
}

#[test]
fn test_spontaneous_link_loss() {
    let (device, recorder) = device(ScanScript::Match);
    device.connect("Slider1");
    recorder.reset();

    device.backend().lose_link();

    assert_eq!(recorder.states(), vec![Disconnecting, Disconnected]);
    assert!(device.can_connect());
}

#[test]
fn test_link_lost_during_write_disconnects() {
    let (device, recorder) = device(ScanScript::Match);
    device.connect("Slider1");
    recorder.reset();
    device.backend().script_writes([Err(WriteError::LinkLost)]);

    assert!(!device.write_str("G0\n"));
    assert_eq!(recorder.states(), vec![Disconnecting, Disconnected]);
}

#[test]
fn test_write_needs_connection() {
    let (device, _recorder) = device(ScanScript::Manual);
    assert!(!device.write_str("A"));
    device.connect("Slider1");
    assert!(!device.write_str("A"));
    assert!(device.backend().attempts().is_empty());
}

#[test]
fn test_input_bytes_arrive_in_order() {
    let (device, recorder) = device(ScanScript::Match);
    device.connect("Slider1");

    device.backend().push_data(&[0x41, 0x42]);
    device.backend().push_data(&[0x43]);
    assert_eq!(recorder.inputs(), 2);

    assert!(device.byte_available());
    assert_eq!(device.get_byte(), Some(0x41));
    assert!(device.byte_available());
    assert_eq!(device.get_byte(), Some(0x42));
    assert!(device.byte_available());
    assert_eq!(device.get_byte(), Some(0x43));
    assert!(!device.byte_available());
    assert_eq!(device.get_byte(), None);
}

#[test]
fn test_data_from_previous_connection_is_dropped() {
    let (device, _recorder) = device(ScanScript::Match);
    device.connect("Slider1");
    let old_link = device.backend().link_events().unwrap();

    device.disconnect();
    device.connect("Slider1");
    old_link.data_received(vec![0xFF]);
    old_link.link_lost();

    assert!(!device.byte_available());
    assert_eq!(device.state(), Connected);
}

#[test]
fn test_can_connect_over_all_states() {
    for state in ConnectionState::ALL {
        let expected = matches!(state, Disconnected | Disconnecting | NotFound);
        assert_eq!(state.can_connect(), expected, "{:?}", state);
    }
}
