//! End-to-end device scenarios over the simulated control box.

use std::time::Duration;
use tellie_control::adapters::MockAdapter;
use tellie_control::device::{
    ChannelInit, ChannelSettings, DeviceSession, FireMode, FiringState, GlobalSettings, Phase,
    ReadoutTiming,
};
use tellie_control::hardware::mock::simulated_pin_mean;
use tellie_control::protocol::{ChipVariant, Channel, Codec, SessionOptions, TransportSession};
use tellie_control::rpc::types::{SettingsReply, UNSET};
use tellie_control::{ErrorKind, TellieError};

fn ch(n: u32) -> Channel {
    Channel::new(n).unwrap()
}

fn device_with(adapter: &MockAdapter, variant: ChipVariant) -> DeviceSession {
    let transport = TransportSession::new(
        Box::new(adapter.clone()),
        Codec::new(variant),
        SessionOptions::immediate(),
    );
    DeviceSession::new(
        transport,
        ReadoutTiming {
            poll_interval: Duration::from_millis(1),
            pin_timeout: Duration::from_millis(50),
            temp_timeout: Duration::from_millis(50),
        },
    )
}

async fn ready_device(adapter: &MockAdapter) -> DeviceSession {
    let mut device = device_with(adapter, ChipVariant::Standard);
    device.initialise(true).await.unwrap();
    device
}

fn init(channel: u32, pulses: u32, height: u16) -> ChannelInit {
    ChannelInit {
        channel: ch(channel),
        pulse_number: pulses,
        pulse_delay_ms: 1.0,
        trigger_delay_ns: 25.0,
        pulse_width: 100,
        pulse_height: height,
        fibre_delay_ns: 1.25,
    }
}

#[tokio::test]
async fn test_initialise_resets_and_clears() {
    let adapter = MockAdapter::new();
    let device = ready_device(&adapter).await;

    assert_eq!(adapter.rts_log(), vec![true, false]);
    assert_eq!(adapter.write_log(), vec![b"C".to_vec(), b"B".to_vec()]);
    assert_eq!(device.phase(), Phase::Idle);
    assert_eq!(device.settings().external_trigger, Some(false));
}

#[tokio::test]
async fn test_sequence_on_channel_five_then_stop() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    device.select_channel(ch(5)).await.unwrap();
    device.set_pulse_width(9000, false).await.unwrap();
    device.set_pulse_height(16383).await.unwrap();
    device.set_fibre_delay(0.0).await.unwrap();
    device.set_pulse_number(100).await.unwrap();
    device.set_pulse_delay(1.0).await.unwrap();
    device.set_trigger_delay(0.0).await.unwrap();
    device.check_ready().unwrap();

    device.fire_sequence().await.unwrap();
    assert_eq!(device.phase(), Phase::Firing);

    let mut reading = None;
    for _ in 0..50 {
        reading = device.read_pin_sequence().await.unwrap();
        if reading.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let reading = reading.expect("sequence produced a PIN reading");
    assert_eq!(reading.channel, 5);
    assert_eq!(reading.mean, simulated_pin_mean(16383));
    assert!(device.firing_state().is_idle());
    assert_eq!(device.phase(), Phase::ChannelLoaded);

    device.stop().await.unwrap();
    assert!(device.firing_state().is_idle());
    let settings = device.settings();
    assert!(settings.channels.is_empty());
    assert_eq!(settings.globals, GlobalSettings::default());
    assert_eq!(settings.phase, Phase::Idle);

    let reply = SettingsReply::from(settings);
    assert_eq!(reply.pulse_number, UNSET);
    assert_eq!(reply.pulse_delay_ms, UNSET);
    assert_eq!(reply.trigger_delay_ns, UNSET);

    // The per-channel slot was wiped too
    device.select_channel(ch(5)).await.unwrap();
    let settings = device.settings();
    assert_eq!(settings.channel_settings[0].settings, ChannelSettings::default());
    device.check_ready().unwrap_err();
}

#[tokio::test]
async fn test_load_fire_read_scenario() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    let snapshot = device.init_channel(&init(12, 1000, 8000)).await.unwrap();
    assert_eq!(snapshot.channels, vec![12]);
    assert_eq!(snapshot.globals.pulse_number, Some(1000));
    assert_eq!(snapshot.channel_settings[0].settings.fibre_delay, Some(1.25));
    assert_eq!(snapshot.phase, Phase::ChannelLoaded);

    adapter.with_pulser(|p| {
        assert_eq!(p.selected_channels(), &[12]);
        assert_eq!(p.pulse_height(12), Some(8000));
        assert_eq!(p.pulse_width(12), Some(100));
        assert_eq!(p.fibre_delay_units(12), Some(5));
        assert_eq!(p.pulse_number(), 1000);
        assert_eq!(p.trigger_delay_units(), 5);
    });

    device.fire(false).await.unwrap();
    assert_eq!(device.phase(), Phase::Firing);

    // The simulated series has already finished; the first read sees the end
    // marker and collects the PIN value.
    let reading = device.read_pin(ch(12)).await.unwrap().unwrap();
    assert_eq!(reading.channel, 12);
    assert_eq!(reading.mean, simulated_pin_mean(8000));
    assert_eq!(device.phase(), Phase::ChannelLoaded);

    let buffer = device.stop().await.unwrap();
    assert!(buffer.is_empty(), "nothing left after stop: {buffer:?}");
    assert_eq!(device.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_multi_channel_fire_reads_every_channel() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;
    device.init_channel(&init(3, 100, 2000)).await.unwrap();
    device.init_channel(&init(17, 100, 4000)).await.unwrap();

    device.select_channels(&[ch(3), ch(17)]).await.unwrap();
    assert_eq!(adapter.with_pulser(|p| p.selected_channels().to_vec()), vec![3, 17]);

    let err = device.set_pulse_height(10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(err.to_string().contains("single channel"));

    device.fire(false).await.unwrap();
    assert_eq!(device.firing_state(), FiringState::Reading(FireMode::Series));

    let readings = device.read_pins().await.unwrap().unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].channel, 3);
    assert_eq!(readings[0].mean, simulated_pin_mean(2000));
    assert_eq!(readings[1].channel, 17);
    assert_eq!(readings[1].mean, simulated_pin_mean(4000));
    assert!(device.firing_state().is_idle());
}

#[tokio::test]
async fn test_cache_suppresses_repeated_settings() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    adapter.clear_log();
    device.set_pulse_number(1000).await.unwrap();
    assert_eq!(adapter.write_count(), 2);
    device.set_pulse_number(1000).await.unwrap();
    assert_eq!(adapter.write_count(), 2, "cached pulse number not resent");

    device.init_channel(&init(5, 100, 3000)).await.unwrap();
    // Every forced setting was written once by the init
    assert!(!device.force_setting());

    adapter.clear_log();
    device.set_pulse_height(3000).await.unwrap();
    device.set_pulse_width(100, false).await.unwrap();
    device.set_fibre_delay(1.25).await.unwrap();
    device.set_pulse_delay(1.0).await.unwrap();
    device.set_trigger_delay(25.0).await.unwrap();
    assert_eq!(adapter.write_count(), 0);

    device.set_pulse_height(3001).await.unwrap();
    assert_eq!(adapter.write_count(), 3);

    device.clear_channel_settings(ch(5));
    adapter.clear_log();
    device.set_pulse_height(3001).await.unwrap();
    assert_eq!(adapter.write_count(), 3, "cleared value is resent");

    device.clear_global_settings();
    adapter.clear_log();
    device.set_trigger_delay(25.0).await.unwrap();
    assert_eq!(adapter.write_count(), 1);
}

#[tokio::test]
async fn test_selection_change_forces_one_resend() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    device.select_channel(ch(5)).await.unwrap();
    assert!(device.force_setting());

    adapter.clear_log();
    device.set_pulse_width(9000, false).await.unwrap();
    assert_eq!(adapter.write_count(), 2);
    device.set_pulse_width(9000, false).await.unwrap();
    assert_eq!(adapter.write_count(), 2, "repeated width not resent");

    // Reselecting the same channel changes nothing
    device.select_channel(ch(5)).await.unwrap();
    adapter.clear_log();
    device.set_pulse_width(9000, false).await.unwrap();
    assert_eq!(adapter.write_count(), 0);

    device.select_channel(ch(6)).await.unwrap();
    device.select_channel(ch(5)).await.unwrap();
    adapter.clear_log();
    device.set_pulse_width(9000, false).await.unwrap();
    assert_eq!(adapter.write_count(), 2, "resent after a selection change");
    device.set_pulse_width(9000, false).await.unwrap();
    assert_eq!(adapter.write_count(), 2);

    // Globals cached before the switch are forced once as well
    device.set_pulse_number(1000).await.unwrap();
    device.select_channel(ch(7)).await.unwrap();
    adapter.clear_log();
    device.set_pulse_number(1000).await.unwrap();
    device.set_pulse_number(1000).await.unwrap();
    assert_eq!(adapter.write_count(), 2);
}

#[tokio::test]
async fn test_channel_addressing() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    for (channel, box_number) in [(1, 1), (8, 1), (9, 2), (56, 7), (57, 8), (96, 12)] {
        device.select_channel(ch(channel)).await.unwrap();
        let select = adapter.write_log().last().cloned().unwrap();
        assert_eq!(select, vec![b'I', channel as u8, b'N']);
        assert_eq!(ch(channel).box_number(), box_number);
    }

    assert!(Channel::new(0).is_err());
    assert!(Channel::new(97).is_err());
}

#[tokio::test]
async fn test_register_bank_follows_channel() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    device.init_channel(&init(56, 100, 1000)).await.unwrap();
    device.fire_sequence().await.unwrap();
    assert_eq!(adapter.written_bytes().last(), Some(&b's'));
    device.read_pin_sequence().await.unwrap().unwrap();

    device.init_channel(&init(57, 100, 1000)).await.unwrap();
    device.fire_sequence().await.unwrap();
    assert_eq!(adapter.written_bytes().last(), Some(&b'U'));
    device.read_pin_sequence().await.unwrap().unwrap();
}

#[tokio::test]
async fn test_legacy_series_fire_has_no_echo() {
    let adapter = MockAdapter::new();
    let mut device = device_with(&adapter, ChipVariant::Legacy);
    device.initialise(false).await.unwrap();
    device.init_channel(&init(70, 100, 1000)).await.unwrap();

    device.fire(false).await.unwrap();
    assert_eq!(adapter.written_bytes().last(), Some(&b's'));
    assert_eq!(device.firing_state(), FiringState::Firing(FireMode::Sequence));
    assert!(device.read_pin_sequence().await.unwrap().is_some());
}

#[tokio::test]
async fn test_state_legality() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    let err = device.read_pin(ch(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    let err = device.set_pulse_width(10, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State, "no channel selected");
    let err = device.fire_sequence().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    device.init_channel(&init(9, 1000, 500)).await.unwrap();
    adapter.with_pulser(|p| p.hold_readouts(true));
    device.fire(false).await.unwrap();
    adapter.clear_log();

    for err in [
        device.select_channel(ch(10)).await.unwrap_err(),
        device.set_pulse_number(10).await.unwrap_err(),
        device.enable_external_trigger().await.unwrap_err(),
        device.fire_continuous().await.unwrap_err(),
        device.read_temp().await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::State, "{err}");
    }
    assert_eq!(adapter.write_count(), 0, "rejected calls never touch the wire");

    device.stop().await.unwrap();
    assert!(device.firing_state().is_idle());
}

#[tokio::test]
async fn test_out_of_range_parameters_rejected() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;
    device.select_channel(ch(1)).await.unwrap();
    adapter.clear_log();

    for err in [
        device.set_pulse_height(16384).await.unwrap_err(),
        device.set_pulse_number(0).await.unwrap_err(),
        device.set_pulse_number(257).await.unwrap_err(),
        device.set_pulse_delay(0.05).await.unwrap_err(),
        device.set_trigger_delay(1300.0).await.unwrap_err(),
        device.set_fibre_delay(0.3).await.unwrap_err(),
        device.select_temp_probe(65).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
    }
    assert_eq!(adapter.write_count(), 0);
}

#[tokio::test]
async fn test_desync_recovers_exactly_once() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;
    adapter.with_pulser(|p| p.inject_echo_fault(b"B9N"));
    adapter.clear_log();

    let err = device.select_channel(ch(20)).await.unwrap_err();
    match &err {
        TellieError::ProtocolDesync {
            observed, expected, ..
        } => {
            assert_eq!(observed, b"B9N");
            assert_eq!(expected, b"B3N");
        }
        other => panic!("expected desync, got {other:?}"),
    }
    assert_eq!(
        adapter.write_log(),
        vec![vec![b'I', 20, b'N'], b"X".to_vec(), b"C".to_vec()]
    );

    device.forget_device_state();
    device.select_channel(ch(20)).await.unwrap();
    assert_eq!(device.selection(), &[ch(20)]);
}

#[tokio::test]
async fn test_stale_bytes_before_setting() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;
    device.select_channel(ch(2)).await.unwrap();
    adapter.with_pulser(|p| p.inject_stale_bytes(b"junk"));

    let err = device.set_pulse_height(10).await.unwrap_err();
    assert!(matches!(err, TellieError::ProtocolDesync { .. }));
    assert_eq!(adapter.with_pulser(|p| p.pulse_height(2)), Some(0));
}

#[tokio::test]
async fn test_power_loss_command_is_resent() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;
    device.select_channel(ch(33)).await.unwrap();
    adapter.with_pulser(|p| p.inject_power_loss());

    device.set_pulse_width(1234, false).await.unwrap();
    assert_eq!(adapter.with_pulser(|p| p.pulse_width(33)), Some(1234));
}

#[tokio::test]
async fn test_temperature_probe_banks() {
    let adapter = MockAdapter::new();
    let mut device = ready_device(&adapter).await;

    device.select_temp_probe(40).await.unwrap();
    let value = device.read_temp().await.unwrap();
    assert!((value - 30.0).abs() < 1e-9, "probe 40 reads {value}");
    assert_eq!(device.settings().temp_probe, Some(40));
}
