//! CUBIC congestion control (§4.3.2): cubic window growth with a
//! TCP-friendly floor, layered on top of NewReno for slow start and
//! restart-from-idle.
//!
//! All fixed-point math uses `i64` with `CUBIC_SHIFT` (8) bits of fractional
//! precision, matching the source's `int64_t`/`unsigned long` mix; per the
//! design notes this crate does not clamp the cubing step, since the
//! documented operating range never triggers overflow.

use super::newreno;
use super::tcb::{AckType, CcFlags, CcVar, CongSignal, TcpControlBlock, Tunables};
use super::{AlgoData, CongestionAlgorithm};

const CUBIC_SHIFT: u32 = 8;
const CUBIC_SHIFT_4: u32 = 32;
/// ~0.8 << CUBIC_SHIFT.
const CUBIC_BETA: i64 = 204;
/// ~0.2 << CUBIC_SHIFT.
const ONE_SUB_CUBIC_BETA: i64 = 51;
/// 3 * ONE_SUB_CUBIC_BETA.
const THREE_X_PT2: i64 = 153;
/// (2 << CUBIC_SHIFT) - ONE_SUB_CUBIC_BETA.
const TWO_SUB_PT2: i64 = 461;
/// ~0.4 << CUBIC_SHIFT.
const CUBIC_C_FACTOR: i64 = 102;
/// ~0.9 << CUBIC_SHIFT.
const CUBIC_FC_FACTOR: i64 = 230;
/// Don't trust `t_srtt` until this many RTT samples have been taken.
const MIN_RTT_SAMPLES: u32 = 8;
/// Classic 4.4BSD smoothed-RTT storage scale: `t_srtt` is `rtt << TCP_RTT_SHIFT`.
const TCP_RTT_SHIFT: u32 = 5;

/// CUBIC's private per-connection state (`struct cubic` in the source).
#[derive(Debug, Clone, Copy)]
pub struct CubicState {
    /// CUBIC `K`, fixed point with `CUBIC_SHIFT` bits of precision.
    pub k: i64,
    /// Sum of RTT samples across the current epoch, in ticks.
    pub sum_rtt_ticks: i64,
    /// `cwnd` at the most recent congestion event.
    pub max_cwnd: u32,
    /// `cwnd` at the previous congestion event (fast-convergence heuristic).
    pub prev_max_cwnd: u32,
    pub num_cong_events: u32,
    pub min_rtt_ticks: i64,
    pub mean_rtt_ticks: i64,
    pub epoch_ack_count: u32,
    pub t_last_cong: u32,
}

impl CubicState {
    fn new(t_now: u32, srttbase: u32) -> Self {
        CubicState {
            k: 0,
            sum_rtt_ticks: 0,
            max_cwnd: 0,
            prev_max_cwnd: 0,
            num_cong_events: 0,
            min_rtt_ticks: srttbase as i64,
            mean_rtt_ticks: 1,
            epoch_ack_count: 0,
            t_last_cong: t_now,
        }
    }
}

/// CUBIC's `K(wmax_pkts)`: the cubic root of `wmax_pkts * (1-beta)/C`,
/// evaluated by normalizing into `[1/8, 1)` and a quadratic approximation
/// (Apple TR #KT-32's method, reused verbatim by the source).
fn cubic_k(wmax_pkts: u64) -> i64 {
    let mut s: i64 = ((wmax_pkts as i64) * ONE_SUB_CUBIC_BETA << CUBIC_SHIFT) / CUBIC_C_FACTOR;
    let mut p: u32 = 0;
    while s >= 256 {
        s >>= 3;
        p += 1;
    }
    let k = ((s * 275) >> CUBIC_SHIFT) + 98 - (((s * s * 120) >> CUBIC_SHIFT) >> CUBIC_SHIFT);
    k << p
}

/// CUBIC's window at `ticks_since_cong` ticks past the last congestion
/// event: `C*(t-K)^3*mss + wmax`.
fn cubic_cwnd(ticks_since_cong: i64, wmax: u32, smss: u32, k: i64, hz: u32) -> i64 {
    let hz = hz as i64;
    let mut cwnd = ((ticks_since_cong << CUBIC_SHIFT) - (k * hz)) / hz;
    cwnd *= cwnd * cwnd;
    ((cwnd * CUBIC_C_FACTOR * smss as i64) >> CUBIC_SHIFT_4) + wmax as i64
}

/// The "TCP-friendly" window some ticks after a congestion event: the
/// average window NewReno would run at with the same beta.
fn tf_cwnd(ticks_since_cong: i64, rtt_ticks: i64, wmax: u32, smss: u32) -> i64 {
    let rtt_ticks = rtt_ticks.max(1);
    ((wmax as i64 * CUBIC_BETA)
        + ((THREE_X_PT2 * ticks_since_cong * smss as i64 << CUBIC_SHIFT) / TWO_SUB_PT2 / rtt_ticks))
        >> CUBIC_SHIFT
}

fn with_cubic<R>(data: &mut AlgoData, f: impl FnOnce(&mut CubicState) -> R) -> Option<R> {
    match data {
        AlgoData::Cubic(state) => Some(f(state)),
        AlgoData::None => {
            debug_assert!(false, "cubic hook invoked on a connection without CubicState");
            None
        }
    }
}

fn record_rtt(tcb: &TcpControlBlock, tunables: &Tunables, state: &mut CubicState) {
    if tcb.t_rttupdated < MIN_RTT_SAMPLES {
        return;
    }
    let srtt_ticks = (tcb.t_srtt >> TCP_RTT_SHIFT) as i64;

    if srtt_ticks < state.min_rtt_ticks || state.min_rtt_ticks == tunables.tcptv_srttbase as i64 {
        state.min_rtt_ticks = srtt_ticks.max(1);
        if state.min_rtt_ticks > state.mean_rtt_ticks {
            state.mean_rtt_ticks = state.min_rtt_ticks;
        }
    }

    state.sum_rtt_ticks += srtt_ticks;
    state.epoch_ack_count += 1;
}

fn ssthresh_update(tcb: &mut TcpControlBlock, state: &CubicState) {
    tcb.snd_ssthresh = if state.num_cong_events == 0 {
        tcb.snd_cwnd >> 1
    } else {
        ((tcb.snd_cwnd as i64 * CUBIC_BETA) >> CUBIC_SHIFT) as u32
    };
}

pub struct Cubic;

impl CongestionAlgorithm for Cubic {
    fn name(&self) -> &'static str {
        "cubic"
    }

    fn cb_init(&self, tcb: &TcpControlBlock, tunables: &Tunables, data: &mut AlgoData) {
        *data = AlgoData::Cubic(CubicState::new(tcb.t_now, tunables.tcptv_srttbase));
    }

    fn conn_init(&self, tcb: &mut TcpControlBlock, _ccv: &mut CcVar, data: &mut AlgoData) {
        with_cubic(data, |state| {
            state.max_cwnd = tcb.snd_cwnd;
        });
    }

    fn ack_received(
        &self,
        tcb: &mut TcpControlBlock,
        ccv: &mut CcVar,
        data: &mut AlgoData,
        tunables: &Tunables,
        kind: AckType,
    ) {
        with_cubic(data, |state| {
            record_rtt(tcb, tunables, state);
        });

        let eligible = kind == AckType::Ack
            && !tcb.in_recovery()
            && ccv.flags.contains(CcFlags::CWND_LIMITED)
            && (!tunables.rfc3465
                || tcb.snd_cwnd <= tcb.snd_ssthresh
                || ccv.flags.contains(CcFlags::ABC_SENTAWND));
        if !eligible {
            return;
        }

        with_cubic(data, |state| {
            if tcb.snd_cwnd <= tcb.snd_ssthresh || state.min_rtt_ticks == tunables.tcptv_srttbase as i64 {
                newreno::ack_received(tcb, ccv, tunables, kind);
                return;
            }

            let ticks_since_cong = tcb.t_now.wrapping_sub(state.t_last_cong) as i64;
            let w_tf = tf_cwnd(ticks_since_cong, state.mean_rtt_ticks, state.max_cwnd, tcb.t_maxseg);
            let w_cubic_next = cubic_cwnd(
                ticks_since_cong + state.mean_rtt_ticks,
                state.max_cwnd,
                tcb.t_maxseg,
                state.k,
                tunables.hz,
            );

            ccv.flags.remove(CcFlags::ABC_SENTAWND);

            if w_cubic_next < w_tf {
                tcb.snd_cwnd = w_tf.max(0) as u32;
            } else if (tcb.snd_cwnd as i64) < w_cubic_next {
                if tunables.rfc3465 {
                    tcb.snd_cwnd = w_cubic_next.max(0) as u32;
                } else {
                    let delta = w_cubic_next - tcb.snd_cwnd as i64;
                    let incr = (delta * tcb.t_maxseg as i64) / (tcb.snd_cwnd as i64).max(1);
                    tcb.snd_cwnd = (tcb.snd_cwnd as i64 + incr).max(tcb.t_maxseg as i64) as u32;
                }
            }

            if state.num_cong_events == 0 && state.max_cwnd < tcb.snd_cwnd {
                state.max_cwnd = tcb.snd_cwnd;
            }
            log::trace!("cubic: cwnd -> {} (w_tf={w_tf} w_cubic={w_cubic_next})", tcb.snd_cwnd);
        });
    }

    fn cong_signal(
        &self,
        tcb: &mut TcpControlBlock,
        _ccv: &mut CcVar,
        data: &mut AlgoData,
        _tunables: &Tunables,
        signal: CongSignal,
    ) {
        with_cubic(data, |state| match signal {
            CongSignal::NDupAck => {
                if !tcb.in_fastrecovery() {
                    if !tcb.in_congrecovery() {
                        ssthresh_update(tcb, state);
                        state.num_cong_events += 1;
                        state.prev_max_cwnd = state.max_cwnd;
                        state.max_cwnd = tcb.snd_cwnd;
                    }
                    tcb.enter_recovery();
                    log::debug!("cubic: entering recovery, ssthresh={}", tcb.snd_ssthresh);
                }
            }
            CongSignal::Ecn => {
                if !tcb.in_congrecovery() {
                    ssthresh_update(tcb, state);
                    state.num_cong_events += 1;
                    state.prev_max_cwnd = state.max_cwnd;
                    state.max_cwnd = tcb.snd_cwnd;
                    state.t_last_cong = tcb.t_now;
                    tcb.snd_cwnd = tcb.snd_ssthresh;
                    tcb.enter_congrecovery();
                }
            }
            CongSignal::Rto => {
                // The first RTO might be spurious; only a repeated RTO
                // counts as a real congestion event.
                if tcb.t_rxtshift >= 2 {
                    state.num_cong_events += 1;
                    state.t_last_cong = tcb.t_now;
                }
            }
            CongSignal::RtoErr => {}
        });
    }

    fn post_recovery(&self, tcb: &mut TcpControlBlock, ccv: &mut CcVar, data: &mut AlgoData) {
        with_cubic(data, |state| {
            if state.max_cwnd < state.prev_max_cwnd {
                state.max_cwnd = ((state.max_cwnd as i64 * CUBIC_FC_FACTOR) >> CUBIC_SHIFT) as u32;
            }

            if tcb.in_fastrecovery() {
                let inflight = super::tcb::seq_diff(tcb.snd_max, ccv.curack);
                if inflight < tcb.snd_ssthresh as i64 {
                    tcb.snd_cwnd = (inflight.max(0) as u32) + tcb.t_maxseg;
                } else {
                    tcb.snd_cwnd = core::cmp::max(1, (state.max_cwnd as i64 * CUBIC_BETA) >> CUBIC_SHIFT) as u32;
                }
            }
            state.t_last_cong = tcb.t_now;

            if state.epoch_ack_count > 0 && state.sum_rtt_ticks >= state.epoch_ack_count as i64 {
                state.mean_rtt_ticks = state.sum_rtt_ticks / state.epoch_ack_count as i64;
            }
            state.epoch_ack_count = 0;
            state.sum_rtt_ticks = 0;
            state.k = cubic_k((state.max_cwnd / tcb.t_maxseg.max(1)) as u64);
            log::trace!("cubic: post_recovery max_cwnd={} K={}", state.max_cwnd, state.k);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb_with_cwnd(maxseg: u32, cwnd: u32) -> TcpControlBlock {
        TcpControlBlock {
            snd_cwnd: cwnd,
            snd_ssthresh: 1_000_000,
            snd_wnd: 1_000_000,
            t_maxseg: maxseg,
            t_rttupdated: MIN_RTT_SAMPLES,
            t_srtt: 50 << TCP_RTT_SHIFT,
            ..Default::default()
        }
    }

    #[test]
    fn k_is_near_spec_example_for_100_segment_wmax() {
        // wmax = 100 segments: K ~= cbrt(100 * 0.2 / 0.4) = cbrt(50) ~= 3.68.
        let k = cubic_k(100);
        let k_float = k as f64 / (1i64 << CUBIC_SHIFT) as f64;
        assert!((3.0..4.3).contains(&k_float), "K = {k_float}");
    }

    #[test]
    fn cwnd_crosses_wmax_near_k_ticks() {
        let wmax = 100u32;
        let maxseg = 1u32;
        let k = cubic_k(wmax as u64);
        let hz = 1000u32;
        let k_ticks = k >> CUBIC_SHIFT;

        let before = cubic_cwnd(k_ticks - 1, wmax, maxseg, k, hz);
        let at = cubic_cwnd(k_ticks, wmax, maxseg, k, hz);
        let after = cubic_cwnd(k_ticks + 1, wmax, maxseg, k, hz);

        assert!(before <= at);
        assert!(at <= after);
    }

    #[test]
    fn slow_start_delegates_to_newreno() {
        let maxseg = 1460;
        let mut tcb = tcb_with_cwnd(maxseg, maxseg);
        tcb.snd_ssthresh = 16 * maxseg;
        let mut ccv = CcVar {
            bytes_this_ack: maxseg,
            flags: CcFlags::CWND_LIMITED,
            curack: 0,
        };
        let mut data = AlgoData::Cubic(CubicState::new(0, Tunables::default().tcptv_srttbase));
        Cubic.ack_received(&mut tcb, &mut ccv, &mut data, &Tunables::default(), AckType::Ack);
        assert_eq!(tcb.snd_cwnd, 2 * maxseg);
    }

    #[test]
    fn cong_avoidance_growth_is_monotonic_across_acks() {
        let maxseg = 1460;
        let mut tcb = tcb_with_cwnd(maxseg, 20 * maxseg);
        tcb.snd_ssthresh = 10 * maxseg;
        tcb.t_now = 0;
        let tunables = Tunables::default();
        let mut data = AlgoData::Cubic(CubicState {
            max_cwnd: 25 * maxseg,
            mean_rtt_ticks: 50,
            min_rtt_ticks: 50,
            t_last_cong: 0,
            ..CubicState::new(0, tunables.tcptv_srttbase)
        });

        let mut prev = tcb.snd_cwnd;
        for tick in 1..20u32 {
            tcb.t_now = tick * 10;
            let mut ccv = CcVar {
                bytes_this_ack: maxseg,
                flags: CcFlags::CWND_LIMITED,
                curack: 0,
            };
            Cubic.ack_received(&mut tcb, &mut ccv, &mut data, &tunables, AckType::Ack);
            assert!(tcb.snd_cwnd >= prev, "cwnd regressed at tick {tick}");
            prev = tcb.snd_cwnd;
        }
    }

    #[test]
    fn post_recovery_applies_fast_convergence_when_max_shrank() {
        let maxseg = 1460;
        let mut tcb = tcb_with_cwnd(maxseg, 10 * maxseg);
        tcb.enter_fastrecovery();
        tcb.snd_ssthresh = 8 * maxseg;
        tcb.snd_max = 50_000;
        let mut ccv = CcVar {
            curack: 0,
            ..Default::default()
        };
        let mut data = AlgoData::Cubic(CubicState {
            max_cwnd: 5 * maxseg,
            prev_max_cwnd: 10 * maxseg,
            ..CubicState::new(0, Tunables::default().tcptv_srttbase)
        });
        Cubic.post_recovery(&mut tcb, &mut ccv, &mut data);
        if let AlgoData::Cubic(state) = &data {
            assert!(state.max_cwnd < 5 * maxseg);
        } else {
            panic!("expected cubic state");
        }
    }
}
