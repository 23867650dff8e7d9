use std::f32::consts::TAU;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{instrument, warn};

use crate::twin::{FFT_BINS, SensorSnapshot};

// How long to wait for the session to release the snapshot
const PUBLISH_WAIT: Duration = Duration::from_millis(100);

const PEAK_MAGNITUDE: f32 = 100.0;
const NOISE_MAGNITUDE: f32 = 2.0;

/// Periodically write a simulated vibration spectrum into the snapshot
///
/// Stands in for the accelerometer FIFO and FFT, which are not part of
/// this agent. The dominant frequency slowly sweeps across the spectrum.
#[instrument(name = "sampler", skip_all)]
pub async fn start(snapshot: SensorSnapshot, every: Duration) {
    let mut rng = StdRng::from_os_rng();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick: u32 = 0;
    loop {
        ticker.tick().await;
        let bins = spectrum(&mut rng, tick);
        if let Err(e) = snapshot.publish(bins, PUBLISH_WAIT).await {
            warn!("dropping sample: {e}");
        }
        tick = tick.wrapping_add(1);
    }
}

// Magnitude spectrum with a single peak over a noise floor
fn spectrum<R: Rng + ?Sized>(rng: &mut R, tick: u32) -> Vec<f32> {
    let sweep = ((tick % 64) as f32 / 64.0 * TAU).sin();
    let peak = (FFT_BINS as f32 / 2.0) * (1.0 + 0.5 * sweep);

    (0..FFT_BINS)
        .map(|bin| {
            let distance = bin as f32 - peak;
            let noise = rng.random_range(0.0..NOISE_MAGNITUDE);
            PEAK_MAGNITUDE / (1.0 + distance * distance) + noise
        })
        .collect()
}
