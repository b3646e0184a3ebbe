//! Build script for tellie_control
//!
//! Generates the gRPC service and client for the pulser control surface. The
//! message types are hand-written prost structs in `src/rpc/types.rs`, so the
//! service is described with tonic-build's manual builder and no protoc step
//! is needed.

use tonic_build::manual::{Builder, Method, Service};

/// (method name, route name, request type, response type)
const METHODS: &[(&str, &str, &str, &str)] = &[
    ("select_channel", "SelectChannel", "ChannelRequest", "Ack"),
    ("select_channels", "SelectChannels", "ChannelsRequest", "Ack"),
    ("clear_channel", "ClearChannel", "Empty", "Ack"),
    ("init_channel", "InitChannel", "InitChannelRequest", "SettingsReply"),
    ("set_pulse_height", "SetPulseHeight", "ValueRequest", "Ack"),
    ("set_pulse_width", "SetPulseWidth", "PulseWidthRequest", "Ack"),
    ("set_pulse_number", "SetPulseNumber", "ValueRequest", "Ack"),
    ("set_pulse_delay", "SetPulseDelay", "DelayRequest", "Ack"),
    ("set_trigger_delay", "SetTriggerDelay", "DelayRequest", "Ack"),
    ("set_fibre_delay", "SetFibreDelay", "DelayRequest", "Ack"),
    ("fire", "Fire", "FireRequest", "Ack"),
    ("fire_sequence", "FireSequence", "Empty", "Ack"),
    ("fire_single", "FireSingle", "Empty", "PinReply"),
    ("fire_continuous", "FireContinuous", "Empty", "Ack"),
    ("trigger_averaged", "TriggerAveraged", "Empty", "Ack"),
    ("stop", "Stop", "Empty", "StopReply"),
    ("read_pin", "ReadPin", "ChannelRequest", "PinReply"),
    ("read_pins", "ReadPins", "Empty", "PinsReply"),
    ("read_pin_sequence", "ReadPinSequence", "Empty", "PinReply"),
    ("select_temp_probe", "SelectTempProbe", "ValueRequest", "Ack"),
    ("read_temp", "ReadTemp", "Empty", "TemperatureReply"),
    ("disable_external_trig", "DisableExternalTrig", "Empty", "Ack"),
    ("enable_external_trig", "EnableExternalTrig", "Empty", "Ack"),
    ("get_settings", "GetSettings", "Empty", "SettingsReply"),
];

fn main() {
    let service = METHODS.iter().fold(
        Service::builder()
            .name("Tellie")
            .package("tellie")
            .comment("Remote control surface of the TELLIE pulser control box"),
        |builder, (name, route, input, output)| {
            builder.method(
                Method::builder()
                    .name(*name)
                    .route_name(*route)
                    .input_type(format!("crate::rpc::types::{input}"))
                    .output_type(format!("crate::rpc::types::{output}"))
                    .codec_path("tonic::codec::ProstCodec")
                    .build(),
            )
        },
    );

    Builder::new().compile(&[service.build()]);
    println!("cargo:rerun-if-changed=build.rs");
}
