//! Shaft encoder device: polls the absolute-position packet and validates
//! it with the Baumer GXM7W-RS485 LRC scheme.
//!
//! Grounded on `original_source/ShaftEncoderModel.py`. The wire reply is
//! `[SOH][EAD][MT_H][MT_L][ST_H][ST_L][LRC][EOT]`; `LRC` must equal the
//! XOR of the five bytes between `SOH` and `LRC`, and `SOH`/`EAD`/`EOT`
//! must carry their required bits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{error, info};
use turntable_common::consts::{
    ENCODER_POSITION_REQUEST, ENCODER_REPLY_EAD_MASK, ENCODER_REPLY_EOT_MASK, ENCODER_REPLY_SOH_MASK,
};
use turntable_common::error::TurntableError;
use turntable_common::math::EncoderReading;
use turntable_common::periodic::PeriodicJob;

use crate::link::DeviceLink;

fn validate_and_extract(packet: &[u8; 8]) -> Result<EncoderReading, TurntableError> {
    let [soh, ead, mt_h, mt_l, st_h, st_l, lrc, eot] = *packet;
    let calculated_lrc = ead ^ mt_h ^ mt_l ^ st_h ^ st_l;

    let valid = lrc == calculated_lrc
        && soh & ENCODER_REPLY_SOH_MASK == ENCODER_REPLY_SOH_MASK
        && ead & ENCODER_REPLY_EAD_MASK == ENCODER_REPLY_EAD_MASK
        && eot & ENCODER_REPLY_EOT_MASK == ENCODER_REPLY_EOT_MASK;

    if !valid {
        return Err(TurntableError::ValidationFailed);
    }

    Ok(EncoderReading {
        revolution: u16::from_be_bytes([mt_h, mt_l]),
        step: u16::from_be_bytes([st_h, st_l]),
    })
}

/// Polls absolute shaft position on a timer and exposes the latest
/// validated reading.
pub struct ShaftEncoder {
    link: Arc<DeviceLink>,
    sample_period: Duration,
    latest: RwLock<EncoderReading>,
    job: parking_lot::Mutex<Option<PeriodicJob>>,
}

impl ShaftEncoder {
    #[must_use]
    pub fn new(link: Arc<DeviceLink>, sample_period: Duration) -> Self {
        Self {
            link,
            sample_period,
            latest: RwLock::new(EncoderReading::default()),
            job: parking_lot::Mutex::new(None),
        }
    }

    /// The most recent validated reading. Unchanged on a failed poll.
    #[must_use]
    pub fn current_reading(&self) -> EncoderReading {
        *self.latest.read()
    }

    /// The current reading mapped to a signed angle in degrees.
    #[must_use]
    pub fn current_angle(&self) -> f64 {
        self.current_reading().angle()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Connect if necessary and start the periodic position-poll job.
    pub async fn start(self: &Arc<Self>) {
        if !self.link.is_connected() {
            info!("connecting to the shaft encoder");
            if let Err(err) = self.link.connect().await {
                error!(%err, "unable to connect to the shaft encoder");
                return;
            }
        }

        if self.job.lock().is_some() {
            return;
        }

        info!(period_s = self.sample_period.as_secs_f64(), "starting the shaft encoder position update job");
        let this = Arc::clone(self);
        let job = PeriodicJob::spawn(self.sample_period, move || {
            let this = Arc::clone(&this);
            async move { this.poll_once().await }
        });
        *self.job.lock() = Some(job);
    }

    /// Stop the poll job and disconnect.
    pub async fn stop(&self) {
        if !self.link.is_connected() {
            return;
        }

        if let Some(job) = self.job.lock().take() {
            info!("stopping the shaft encoder position update job");
            job.stop().await;
        }

        info!("disconnecting from the shaft encoder");
        self.link.disconnect();
    }

    /// Same shutdown as `stop`, but for use from inside the poll job's own
    /// tick: cancels the job instead of joining it, which would await the
    /// very task currently executing and hang forever.
    async fn fail_from_poll(&self) {
        if let Some(job) = self.job.lock().take() {
            job.cancel();
        }

        info!("disconnecting from the shaft encoder");
        self.link.disconnect();
    }

    async fn poll_once(&self) {
        let reply = match self.link.send_and_receive(&ENCODER_POSITION_REQUEST, 8).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(%err, "bad response received from the shaft encoder; stopping");
                self.fail_from_poll().await;
                return;
            }
        };

        let packet: [u8; 8] = match reply.try_into() {
            Ok(packet) => packet,
            Err(_) => {
                error!("shaft encoder reply had the wrong length");
                return;
            }
        };

        match validate_and_extract(&packet) {
            Ok(reading) => *self.latest.write() = reading,
            Err(_) => error!("an error in the received data from the shaft encoder was detected"),
        }
    }
}
