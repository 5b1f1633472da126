// Copyright (c) 2025 The NSCC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parameter derivation.
//!
//! All gains and thresholds of the controller are derived once from two
//! ratios against a fixed reference network: a bandwidth-delay scale and a
//! target-delay scale. Only the ratios matter; the reference point itself
//! is arbitrary. With the target folded into both the delay scale and the
//! proportional gain, the shape of the proportional response is invariant
//! across network sizes and only the equilibrium point shifts.

use std::sync::Arc;

use log::*;

use crate::Config;
use crate::DurationPico;
use crate::Error;
use crate::Result;
use crate::PICOS_PER_SEC;
use crate::PICOS_PER_USEC;

/// Reference network link speed: 100 Gbps.
pub const REF_LINKSPEED_BPS: u64 = 100_000_000_000;

/// Reference network round-trip: 12 us.
pub const REF_RTT: DurationPico = 12 * PICOS_PER_USEC;

/// Multiplicative decrease aggressiveness. The cut fraction per decrease is
/// bounded in [0, GAMMA) by construction.
const GAMMA: f64 = 0.8;

/// EWMA weight for the filtered queuing delay.
const DELAY_ALPHA: f64 = 1.0 / 80.0;

/// Bytes of `bdp` at `linkspeed` over `rtt` picoseconds.
pub(crate) fn bdp_bytes(linkspeed_bps: u64, rtt: DurationPico) -> u64 {
    (linkspeed_bps as u128 * rtt as u128 / 8 / PICOS_PER_SEC as u128) as u64
}

/// Immutable per-process parameter bundle shared by reference with every
/// flow. Derived once, read-only thereafter; no synchronization needed.
#[derive(Debug)]
pub struct ScalingParams {
    /// Maximum transmission unit in bytes.
    pub mtu: u64,

    /// Actual link speed in bits per second.
    pub linkspeed: u64,

    /// Unloaded network round-trip used for derivation, picoseconds.
    pub network_rtt: DurationPico,

    /// Operating-point queuing delay separating the increase quadrants from
    /// the decrease quadrant, picoseconds.
    pub target_qdelay: DurationPico,

    /// Bandwidth-delay scale against the reference network.
    pub scaling_factor_a: f64,

    /// Target-delay scale against the reference round-trip.
    pub scaling_factor_b: f64,

    /// Proportional-increase gain, bytes per picosecond of headroom.
    pub alpha: f64,

    /// Fair-increase constant, bytes.
    pub fi: f64,

    /// Additive nudge applied at every fulfill adjustment, bytes.
    pub eta: f64,

    /// Fast-increase multiplier on newly acknowledged bytes.
    pub fi_scale: f64,

    /// Multiplicative decrease aggressiveness, dimensionless.
    pub gamma: f64,

    /// EWMA weight per delay sample.
    pub delay_alpha: f64,

    /// Delay above which Quick Adapt evaluation is triggered, picoseconds.
    pub qa_threshold: DurationPico,

    /// Underperformance shift for Quick Adapt: fire below
    /// `maxwnd >> qa_gate` achieved bytes.
    pub qa_gate: u8,

    /// Received-bytes trigger for the fulfill adjustment.
    pub adjust_bytes_threshold: u64,

    /// Elapsed-time trigger for the fulfill adjustment, picoseconds.
    pub adjust_period_threshold: DurationPico,

    /// Window ceiling as a multiple of the bandwidth-delay product.
    pub maxwnd_multiplier: f64,

    /// Window floor: one MTU.
    pub min_cwnd: u64,
}

impl ScalingParams {
    /// Derive the bundle from the configuration and the actual per-flow
    /// unloaded round-trip. The round-trip comes from the topology oracle
    /// at connection setup, or from the first flow's measured path RTT when
    /// that is more accurate than the diameter.
    pub fn derive(config: &Config, network_rtt: DurationPico) -> Result<Arc<ScalingParams>> {
        if network_rtt == 0 {
            return Err(Error::InvalidConfig("network_rtt must be non-zero".into()));
        }
        if config.linkspeed() == 0 {
            return Err(Error::InvalidConfig("linkspeed must be non-zero".into()));
        }

        let target_qdelay = match config.target_qdelay() {
            Some(t) => t,
            None if config.trimming_enabled() => network_rtt * 3 / 4,
            None => network_rtt,
        };
        if target_qdelay == 0 {
            return Err(Error::InvalidConfig("target delay must be non-zero".into()));
        }

        let mtu = config.mtu();
        let actual_bdp = bdp_bytes(config.linkspeed(), network_rtt);
        let ref_bdp = bdp_bytes(REF_LINKSPEED_BPS, REF_RTT);

        let a = actual_bdp as f64 / ref_bdp as f64;
        let b = target_qdelay as f64 / REF_RTT as f64;

        let params = ScalingParams {
            mtu,
            linkspeed: config.linkspeed(),
            network_rtt,
            target_qdelay,
            scaling_factor_a: a,
            scaling_factor_b: b,
            alpha: 4.0 * mtu as f64 * a * b / target_qdelay as f64,
            fi: 5.0 * mtu as f64 * a,
            eta: 0.15 * mtu as f64 * a,
            fi_scale: 0.25 * a,
            gamma: GAMMA,
            delay_alpha: DELAY_ALPHA,
            qa_threshold: 4 * target_qdelay,
            qa_gate: config.qa_gate(),
            adjust_bytes_threshold: config.adjust_bytes_packets() * mtu,
            adjust_period_threshold: network_rtt,
            maxwnd_multiplier: config.maxwnd_multiplier(),
            min_cwnd: mtu,
        };

        debug!(
            "scaling: a={:.4} b={:.4} alpha={:.6} fi={:.1} eta={:.1} target={}us",
            params.scaling_factor_a,
            params.scaling_factor_b,
            params.alpha,
            params.fi,
            params.eta,
            params.target_qdelay / PICOS_PER_USEC,
        );

        Ok(Arc::new(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_network_scales_to_unity() {
        // Configure exactly the reference network with trimming: the two
        // scale factors collapse to 1 and 0.75.
        let config = Config::new();
        let params = ScalingParams::derive(&config, REF_RTT).unwrap();

        assert_eq!(params.target_qdelay, 9 * PICOS_PER_USEC);
        assert!((params.scaling_factor_a - 1.0).abs() < 1e-9);
        assert!((params.scaling_factor_b - 0.75).abs() < 1e-9);

        // alpha = 4 * 4096 * 1 * 0.75 / 9us
        let expect_alpha = 4.0 * 4096.0 * 0.75 / (9.0 * PICOS_PER_USEC as f64);
        assert!((params.alpha - expect_alpha).abs() < 1e-12);

        assert!((params.fi - 5.0 * 4096.0).abs() < 1e-9);
        assert!((params.eta - 0.15 * 4096.0).abs() < 1e-9);
        assert!((params.fi_scale - 0.25).abs() < 1e-9);

        assert_eq!(params.qa_threshold, 36 * PICOS_PER_USEC);
        assert_eq!(params.adjust_bytes_threshold, 8 * 4096);
        assert_eq!(params.adjust_period_threshold, REF_RTT);
        assert_eq!(params.min_cwnd, 4096);
    }

    #[test]
    fn bdp_at_reference() {
        // 100 Gbps * 12us / 8 = 150 KB.
        assert_eq!(bdp_bytes(REF_LINKSPEED_BPS, REF_RTT), 150_000);
    }

    #[test]
    fn target_selection_priority() {
        // Explicit override wins.
        let mut config = Config::new();
        config.set_target_qdelay(5 * PICOS_PER_USEC);
        let params = ScalingParams::derive(&config, REF_RTT).unwrap();
        assert_eq!(params.target_qdelay, 5 * PICOS_PER_USEC);

        // Trimming discounts the round-trip.
        let mut config = Config::new();
        config.enable_trimming(true);
        let params = ScalingParams::derive(&config, REF_RTT).unwrap();
        assert_eq!(params.target_qdelay, 9 * PICOS_PER_USEC);

        // Otherwise the full round-trip.
        let mut config = Config::new();
        config.enable_trimming(false);
        let params = ScalingParams::derive(&config, REF_RTT).unwrap();
        assert_eq!(params.target_qdelay, REF_RTT);
    }

    #[test]
    fn alpha_shape_invariant_across_targets() {
        // alpha * target = 4 * MSS * a * b is proportional to the target
        // through b alone, so alpha * target / b is constant: the response
        // shape does not depend on the operating point.
        let mut config = Config::new();
        config.set_target_qdelay(6 * PICOS_PER_USEC);
        let p6 = ScalingParams::derive(&config, REF_RTT).unwrap();

        config.set_target_qdelay(12 * PICOS_PER_USEC);
        let p12 = ScalingParams::derive(&config, REF_RTT).unwrap();

        let shape6 = p6.alpha * p6.target_qdelay as f64 / p6.scaling_factor_b;
        let shape12 = p12.alpha * p12.target_qdelay as f64 / p12.scaling_factor_b;
        assert!((shape6 - shape12).abs() / shape6 < 1e-12);
    }

    #[test]
    fn derive_rejects_degenerate_inputs() {
        let config = Config::new();
        assert!(matches!(
            ScalingParams::derive(&config, 0),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = Config::new();
        config.set_linkspeed(0);
        assert!(ScalingParams::derive(&config, REF_RTT).is_err());
    }

    #[test]
    fn half_speed_network_halves_gains() {
        let mut config = Config::new();
        config.set_linkspeed(REF_LINKSPEED_BPS / 2);
        let params = ScalingParams::derive(&config, REF_RTT).unwrap();

        assert!((params.scaling_factor_a - 0.5).abs() < 1e-9);
        assert!((params.fi - 2.5 * 4096.0).abs() < 1e-9);
        assert!((params.fi_scale - 0.125).abs() < 1e-9);
    }
}
