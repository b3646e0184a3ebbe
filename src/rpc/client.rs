//! Client for a remote `tellie_server`.

use super::generated::tellie_client::TellieClient;
use super::types::{
    ChannelRequest, ChannelsRequest, DelayRequest, Empty, FireRequest, InitChannelRequest,
    PulseWidthRequest, SettingsReply, ValueRequest,
};
use crate::device::ChannelInit;
use crate::error::{TellieError, TellieResult};
use crate::protocol::channel::Channel;
use crate::protocol::readout::PinReading;
use tonic::transport::Channel as RpcChannel;

/// High-level client over the generated gRPC stub.
///
/// Faults come back as [`TellieError::Rpc`], whose
/// [`kind`](TellieError::kind) follows the status code.
#[derive(Debug, Clone)]
pub struct RemoteTellie {
    client: TellieClient<RpcChannel>,
}

impl RemoteTellie {
    /// Connect to the server at `address` (`host:port` or a full URI).
    pub async fn connect(address: &str) -> TellieResult<Self> {
        let address = if address.starts_with("http") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        tracing::info!("Connecting to {}", address);
        let channel = RpcChannel::from_shared(address)
            .map_err(|e| TellieError::configuration(e.to_string()))?
            .connect()
            .await?;
        Ok(Self {
            client: TellieClient::new(channel),
        })
    }

    fn client(&self) -> TellieClient<RpcChannel> {
        self.client.clone()
    }

    pub async fn select_channel(&self, channel: Channel) -> TellieResult<()> {
        self.client()
            .select_channel(ChannelRequest {
                channel: u32::from(channel.number()),
            })
            .await?;
        Ok(())
    }

    pub async fn select_channels(&self, channels: &[Channel]) -> TellieResult<()> {
        self.client()
            .select_channels(ChannelsRequest {
                channels: channels.iter().map(|c| u32::from(c.number())).collect(),
            })
            .await?;
        Ok(())
    }

    pub async fn clear_channel(&self) -> TellieResult<()> {
        self.client().clear_channel(Empty {}).await?;
        Ok(())
    }

    pub async fn init_channel(&self, init: ChannelInit) -> TellieResult<SettingsReply> {
        let reply = self
            .client()
            .init_channel(InitChannelRequest {
                channel: u32::from(init.channel.number()),
                pulse_number: init.pulse_number,
                pulse_delay_ms: init.pulse_delay_ms,
                trigger_delay_ns: init.trigger_delay_ns,
                pulse_width: u32::from(init.pulse_width),
                pulse_height: u32::from(init.pulse_height),
                fibre_delay_ns: init.fibre_delay_ns,
            })
            .await?;
        Ok(reply.into_inner())
    }

    pub async fn set_pulse_height(&self, height: u16) -> TellieResult<()> {
        self.client()
            .set_pulse_height(ValueRequest {
                value: u32::from(height),
            })
            .await?;
        Ok(())
    }

    pub async fn set_pulse_width(&self, width: u16, while_fire: bool) -> TellieResult<()> {
        self.client()
            .set_pulse_width(PulseWidthRequest {
                width: u32::from(width),
                while_fire,
            })
            .await?;
        Ok(())
    }

    pub async fn set_pulse_number(&self, number: u32) -> TellieResult<()> {
        self.client()
            .set_pulse_number(ValueRequest { value: number })
            .await?;
        Ok(())
    }

    pub async fn set_pulse_delay(&self, delay_ms: f64) -> TellieResult<()> {
        self.client()
            .set_pulse_delay(DelayRequest { delay: delay_ms })
            .await?;
        Ok(())
    }

    pub async fn set_trigger_delay(&self, delay_ns: f64) -> TellieResult<()> {
        self.client()
            .set_trigger_delay(DelayRequest { delay: delay_ns })
            .await?;
        Ok(())
    }

    pub async fn set_fibre_delay(&self, delay_ns: f64) -> TellieResult<()> {
        self.client()
            .set_fibre_delay(DelayRequest { delay: delay_ns })
            .await?;
        Ok(())
    }

    pub async fn fire(&self, while_fire: bool) -> TellieResult<()> {
        self.client().fire(FireRequest { while_fire }).await?;
        Ok(())
    }

    pub async fn fire_sequence(&self) -> TellieResult<()> {
        self.client().fire_sequence(Empty {}).await?;
        Ok(())
    }

    pub async fn fire_single(&self) -> TellieResult<PinReading> {
        let reply = self.client().fire_single(Empty {}).await?;
        reply
            .into_inner()
            .reading()
            .ok_or_else(|| TellieError::BadReadout("Server returned no PIN reading".into()))
    }

    pub async fn fire_continuous(&self) -> TellieResult<()> {
        self.client().fire_continuous(Empty {}).await?;
        Ok(())
    }

    pub async fn trigger_averaged(&self) -> TellieResult<()> {
        self.client().trigger_averaged(Empty {}).await?;
        Ok(())
    }

    pub async fn stop(&self) -> TellieResult<String> {
        let reply = self.client().stop(Empty {}).await?;
        Ok(reply.into_inner().buffer)
    }

    pub async fn read_pin(&self, channel: Channel) -> TellieResult<Option<PinReading>> {
        let reply = self
            .client()
            .read_pin(ChannelRequest {
                channel: u32::from(channel.number()),
            })
            .await?;
        Ok(reply.into_inner().reading())
    }

    pub async fn read_pins(&self) -> TellieResult<Option<Vec<PinReading>>> {
        let reply = self.client().read_pins(Empty {}).await?.into_inner();
        Ok(reply
            .ready
            .then(|| reply.readings.iter().filter_map(|r| r.reading()).collect()))
    }

    pub async fn read_pin_sequence(&self) -> TellieResult<Option<PinReading>> {
        let reply = self.client().read_pin_sequence(Empty {}).await?;
        Ok(reply.into_inner().reading())
    }

    pub async fn select_temp_probe(&self, probe: u8) -> TellieResult<()> {
        self.client()
            .select_temp_probe(ValueRequest {
                value: u32::from(probe),
            })
            .await?;
        Ok(())
    }

    pub async fn read_temp(&self) -> TellieResult<f64> {
        let reply = self.client().read_temp(Empty {}).await?;
        Ok(reply.into_inner().celsius)
    }

    pub async fn enable_external_trigger(&self) -> TellieResult<()> {
        self.client().enable_external_trig(Empty {}).await?;
        Ok(())
    }

    pub async fn disable_external_trigger(&self) -> TellieResult<()> {
        self.client().disable_external_trig(Empty {}).await?;
        Ok(())
    }

    pub async fn settings(&self) -> TellieResult<SettingsReply> {
        let reply = self.client().get_settings(Empty {}).await?;
        Ok(reply.into_inner())
    }
}
