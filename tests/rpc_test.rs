//! gRPC round trips against a server backed by the simulated box.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tellie_control::adapters::MockAdapter;
use tellie_control::app_actor::{self, DeviceHandle};
use tellie_control::device::{ChannelInit, DeviceSession, ReadoutTiming};
use tellie_control::hardware::mock::simulated_pin_mean;
use tellie_control::orchestrator::{LoadFireRunner, RunOutcome, RunTiming};
use tellie_control::protocol::{Channel, Codec, SessionOptions, TransportSession};
use tellie_control::rpc::generated::tellie_client::TellieClient;
use tellie_control::rpc::types::ChannelRequest;
use tellie_control::rpc::{RemoteTellie, TellieServer, TellieService};
use tellie_control::ErrorKind;
use tokio::net::TcpListener;

struct TestServer {
    addr: SocketAddr,
    adapter: MockAdapter,
    _device: DeviceHandle,
}

async fn start_server() -> TestServer {
    let adapter = MockAdapter::new();
    let transport = TransportSession::new(
        Box::new(adapter.clone()),
        Codec::default(),
        SessionOptions::immediate(),
    );
    let timing = ReadoutTiming {
        poll_interval: Duration::from_millis(1),
        pin_timeout: Duration::from_millis(50),
        temp_timeout: Duration::from_millis(50),
    };
    let (device, _worker) = app_actor::spawn(DeviceSession::new(transport, timing), 8);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = futures::stream::unfold(listener, |listener| async move {
        let conn = listener.accept().await.map(|(stream, _)| stream);
        Some((conn, listener))
    });
    let service = TellieService::new(device.clone());
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(TellieServer::new(service))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    TestServer {
        addr,
        adapter,
        _device: device,
    }
}

fn init(channel: u32) -> ChannelInit {
    ChannelInit {
        channel: Channel::new(channel).unwrap(),
        pulse_number: 100,
        pulse_delay_ms: 1.0,
        trigger_delay_ns: 10.0,
        pulse_width: 0,
        pulse_height: 6000,
        fibre_delay_ns: 0.5,
    }
}

#[tokio::test]
async fn test_remote_sequence_and_settings() {
    let server = start_server().await;
    let remote = RemoteTellie::connect(&server.addr.to_string()).await.unwrap();

    let settings = remote.init_channel(init(21)).await.unwrap();
    assert_eq!(settings.channels, vec![21]);
    assert_eq!(settings.pulse_number, 100.0);
    assert_eq!(settings.phase, "channel_loaded");
    assert_eq!(settings.channel_settings[0].pulse_height, 6000.0);
    assert_eq!(server.adapter.with_pulser(|p| p.pulse_height(21)), Some(6000));

    remote.fire_sequence().await.unwrap();
    assert_eq!(remote.settings().await.unwrap().phase, "firing");

    let reading = remote.read_pin_sequence().await.unwrap().unwrap();
    assert_eq!(reading.channel, 21);
    assert_eq!(reading.mean, simulated_pin_mean(6000));

    let settings = remote.settings().await.unwrap();
    assert_eq!(settings.phase, "channel_loaded");
    assert_eq!(settings.external_trigger, "disabled");
}

#[tokio::test]
async fn test_remote_stop_clears_settings() {
    let server = start_server().await;
    let remote = RemoteTellie::connect(&server.addr.to_string()).await.unwrap();

    remote.init_channel(init(5)).await.unwrap();
    remote.fire_continuous().await.unwrap();
    remote.stop().await.unwrap();

    let settings = remote.settings().await.unwrap();
    assert!(settings.channels.is_empty());
    assert_eq!(settings.pulse_number, -999.0);
    assert_eq!(settings.phase, "idle");
    assert!(!server.adapter.with_pulser(|p| p.is_firing()));
}

#[tokio::test]
async fn test_fault_kinds_survive_the_wire() {
    let server = start_server().await;
    let remote = RemoteTellie::connect(&server.addr.to_string()).await.unwrap();

    let err = remote.set_pulse_height(1000).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    let err = remote.set_pulse_delay(0.01).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut raw = TellieClient::connect(format!("http://{}", server.addr))
        .await
        .unwrap();
    let status = raw
        .select_channel(ChannelRequest { channel: 97 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    // Rejections never reach the box
    assert_eq!(server.adapter.write_count(), 0);
}

#[tokio::test]
async fn test_remote_load_fire_run() {
    let server = start_server().await;
    let remote = RemoteTellie::connect(&server.addr.to_string()).await.unwrap();
    let runner = LoadFireRunner::new(
        Arc::new(remote),
        RunTiming {
            poll_interval: Duration::from_millis(5),
            readout_timeout: Duration::from_secs(1),
        },
    );

    match runner.start(init(44)).unwrap().join().await.unwrap() {
        RunOutcome::Completed(reading) => {
            assert_eq!(reading.channel, 44);
            assert_eq!(reading.mean, simulated_pin_mean(6000));
        }
        RunOutcome::Cancelled => panic!("run was not cancelled"),
    }
}
