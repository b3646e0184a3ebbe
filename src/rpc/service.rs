//! `tellie.Tellie` service implementation.
//!
//! Each handler converts its arguments, forwards the call to the device
//! worker and maps the result. Handlers hold no device state of their own;
//! the worker queue serializes concurrent calls.

use super::generated::tellie_server::Tellie;
use super::types::{
    Ack, ChannelRequest, ChannelsRequest, DelayRequest, Empty, FireRequest, InitChannelRequest,
    PinReply, PinsReply, PulseWidthRequest, SettingsReply, StopReply, TemperatureReply,
    ValueRequest,
};
use crate::app_actor::DeviceHandle;
use crate::device::ChannelInit;
use crate::error::{ErrorKind, TellieError};
use crate::protocol::channel::Channel;
use tonic::{Request, Response, Status};

/// Map a driver error onto a gRPC status.
pub fn to_status(error: TellieError) -> Status {
    if let TellieError::Rpc(status) = error {
        return status;
    }
    let message = error.to_string();
    match error.kind() {
        ErrorKind::Configuration => Status::invalid_argument(message),
        ErrorKind::State => Status::failed_precondition(message),
        ErrorKind::Protocol => Status::aborted(message),
        ErrorKind::Link => Status::unavailable(message),
    }
}

fn narrow<T: TryFrom<u32>>(value: u32, what: &str) -> Result<T, Status> {
    T::try_from(value).map_err(|_| Status::invalid_argument(format!("{what} out of range: {value}")))
}

fn channel(value: u32) -> Result<Channel, Status> {
    Channel::new(value).map_err(to_status)
}

/// gRPC front end over a device worker.
#[derive(Debug, Clone)]
pub struct TellieService {
    device: DeviceHandle,
}

impl TellieService {
    pub fn new(device: DeviceHandle) -> Self {
        Self { device }
    }
}

fn ack(result: crate::error::TellieResult<()>) -> Result<Response<Ack>, Status> {
    result.map(|()| Response::new(Ack::ok())).map_err(to_status)
}

#[tonic::async_trait]
impl Tellie for TellieService {
    async fn select_channel(
        &self,
        request: Request<ChannelRequest>,
    ) -> Result<Response<Ack>, Status> {
        let channel = channel(request.into_inner().channel)?;
        ack(self.device.select_channel(channel).await)
    }

    async fn select_channels(
        &self,
        request: Request<ChannelsRequest>,
    ) -> Result<Response<Ack>, Status> {
        let channels = request
            .into_inner()
            .channels
            .into_iter()
            .map(channel)
            .collect::<Result<Vec<_>, _>>()?;
        ack(self.device.select_channels(channels).await)
    }

    async fn clear_channel(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.device.clear_channel().await)
    }

    async fn init_channel(
        &self,
        request: Request<InitChannelRequest>,
    ) -> Result<Response<SettingsReply>, Status> {
        let req = request.into_inner();
        let init = ChannelInit {
            channel: channel(req.channel)?,
            pulse_number: req.pulse_number,
            pulse_delay_ms: req.pulse_delay_ms,
            trigger_delay_ns: req.trigger_delay_ns,
            pulse_width: narrow(req.pulse_width, "Pulse width")?,
            pulse_height: narrow(req.pulse_height, "Pulse height")?,
            fibre_delay_ns: req.fibre_delay_ns,
        };
        tracing::info!(channel = %init.channel, "init_channel");
        let snapshot = self.device.init_channel(init).await.map_err(to_status)?;
        Ok(Response::new(SettingsReply::from(snapshot)))
    }

    async fn set_pulse_height(
        &self,
        request: Request<ValueRequest>,
    ) -> Result<Response<Ack>, Status> {
        let height = narrow(request.into_inner().value, "Pulse height")?;
        ack(self.device.set_pulse_height(height).await)
    }

    async fn set_pulse_width(
        &self,
        request: Request<PulseWidthRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let width = narrow(req.width, "Pulse width")?;
        ack(self.device.set_pulse_width(width, req.while_fire).await)
    }

    async fn set_pulse_number(
        &self,
        request: Request<ValueRequest>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.set_pulse_number(request.into_inner().value).await)
    }

    async fn set_pulse_delay(
        &self,
        request: Request<DelayRequest>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.set_pulse_delay(request.into_inner().delay).await)
    }

    async fn set_trigger_delay(
        &self,
        request: Request<DelayRequest>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.set_trigger_delay(request.into_inner().delay).await)
    }

    async fn set_fibre_delay(
        &self,
        request: Request<DelayRequest>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.set_fibre_delay(request.into_inner().delay).await)
    }

    async fn fire(&self, request: Request<FireRequest>) -> Result<Response<Ack>, Status> {
        ack(self.device.fire(request.into_inner().while_fire).await)
    }

    async fn fire_sequence(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.device.fire_sequence().await)
    }

    async fn fire_single(&self, _request: Request<Empty>) -> Result<Response<PinReply>, Status> {
        let reading = self.device.fire_single().await.map_err(to_status)?;
        Ok(Response::new(PinReply::from(reading)))
    }

    async fn fire_continuous(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.device.fire_continuous().await)
    }

    async fn trigger_averaged(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.device.trigger_averaged().await)
    }

    async fn stop(&self, _request: Request<Empty>) -> Result<Response<StopReply>, Status> {
        tracing::info!("stop");
        let buffer = self.device.stop().await.map_err(to_status)?;
        Ok(Response::new(StopReply { buffer }))
    }

    async fn read_pin(
        &self,
        request: Request<ChannelRequest>,
    ) -> Result<Response<PinReply>, Status> {
        let channel = channel(request.into_inner().channel)?;
        let reading = self.device.read_pin(channel).await.map_err(to_status)?;
        Ok(Response::new(PinReply::from(reading)))
    }

    async fn read_pins(&self, _request: Request<Empty>) -> Result<Response<PinsReply>, Status> {
        let readings = self.device.read_pins().await.map_err(to_status)?;
        Ok(Response::new(PinsReply::from(readings)))
    }

    async fn read_pin_sequence(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<PinReply>, Status> {
        let reading = self.device.read_pin_sequence().await.map_err(to_status)?;
        Ok(Response::new(PinReply::from(reading)))
    }

    async fn select_temp_probe(
        &self,
        request: Request<ValueRequest>,
    ) -> Result<Response<Ack>, Status> {
        let probe = narrow(request.into_inner().value, "Temperature probe")?;
        ack(self.device.select_temp_probe(probe).await)
    }

    async fn read_temp(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<TemperatureReply>, Status> {
        let celsius = self.device.read_temp().await.map_err(to_status)?;
        Ok(Response::new(TemperatureReply { celsius }))
    }

    async fn disable_external_trig(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.disable_external_trigger().await)
    }

    async fn enable_external_trig(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.device.enable_external_trigger().await)
    }

    async fn get_settings(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<SettingsReply>, Status> {
        let snapshot = self.device.settings().await.map_err(to_status)?;
        Ok(Response::new(SettingsReply::from(snapshot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use tonic::Code;

    #[test]
    fn test_fault_mapping() {
        assert_eq!(
            to_status(TellieError::Configuration("range".into())).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            to_status(TellieError::Config(ConfigError::ValidationError("x".into()))).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            to_status(TellieError::State("firing".into())).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            to_status(TellieError::BadReadout("1 2".into())).code(),
            Code::Aborted
        );
        assert_eq!(to_status(TellieError::WorkerGone).code(), Code::Unavailable);
    }

    #[test]
    fn test_out_of_range_arguments() {
        assert_eq!(channel(97).unwrap_err().code(), Code::InvalidArgument);
        let err = narrow::<u16>(70_000, "Pulse height").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
