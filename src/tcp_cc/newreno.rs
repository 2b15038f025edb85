//! The NewReno algorithm (§4.3.1): always registered, and the fallback
//! `cong_avoid`/`after_idle` behavior CUBIC delegates to outside its own
//! operating region.

use super::tcb::{seq_diff, AckType, CcFlags, CcVar, CongSignal, TcpControlBlock, Tunables};
use super::{AlgoData, CongestionAlgorithm};

pub struct NewReno;

pub(super) fn ack_received(tcb: &mut TcpControlBlock, ccv: &mut CcVar, tunables: &Tunables, kind: AckType) {
    if kind != AckType::Ack || tcb.in_recovery() || !ccv.flags.contains(CcFlags::CWND_LIMITED) {
        return;
    }

    let cw = tcb.snd_cwnd;
    let mut incr = tcb.t_maxseg;

    if cw > tcb.snd_ssthresh {
        // Congestion avoidance.
        if tunables.rfc3465 {
            if ccv.flags.contains(CcFlags::ABC_SENTAWND) {
                ccv.flags.remove(CcFlags::ABC_SENTAWND);
            } else {
                incr = 0;
            }
        } else {
            incr = core::cmp::max(incr.saturating_mul(incr) / cw.max(1), 1);
        }
    } else if tunables.rfc3465 {
        // Slow start with Appropriate Byte Counting.
        let cap = if tcb.snd_nxt == tcb.snd_max {
            tunables.abc_limit
        } else {
            1
        };
        incr = core::cmp::min(ccv.bytes_this_ack, tcb.t_maxseg.saturating_mul(cap));
    }

    if incr > 0 {
        let cap = tunables.tcp_maxwin << tcb.snd_scale;
        tcb.snd_cwnd = core::cmp::min(cw.saturating_add(incr), cap);
        log::trace!("newreno: cwnd -> {} (incr {incr})", tcb.snd_cwnd);
    }
}

pub(super) fn after_idle(tcb: &mut TcpControlBlock, tunables: &Tunables) {
    let rw = if tunables.rfc3390_mode != 0 {
        core::cmp::min(4 * tcb.t_maxseg, core::cmp::max(2 * tcb.t_maxseg, 4380))
    } else {
        tcb.t_maxseg * 2
    };
    tcb.snd_cwnd = core::cmp::min(rw, tcb.snd_cwnd);
}

pub(super) fn cong_signal(tcb: &mut TcpControlBlock, _ccv: &mut CcVar, signal: CongSignal) {
    match signal {
        CongSignal::NDupAck => {
            if !tcb.in_fastrecovery() {
                if !tcb.in_congrecovery() {
                    let win = core::cmp::max(tcb.snd_cwnd / 2 / tcb.t_maxseg.max(1), 2) * tcb.t_maxseg;
                    tcb.snd_ssthresh = win;
                }
                tcb.enter_recovery();
                log::debug!("newreno: entering recovery, ssthresh={}", tcb.snd_ssthresh);
            }
        }
        CongSignal::Ecn => {
            if !tcb.in_congrecovery() {
                let win = core::cmp::max(tcb.snd_cwnd / 2 / tcb.t_maxseg.max(1), 2) * tcb.t_maxseg;
                tcb.snd_ssthresh = win;
                tcb.snd_cwnd = win;
                tcb.enter_congrecovery();
            }
        }
        CongSignal::Rto | CongSignal::RtoErr => {
            // Handled uniformly by the framework dispatcher before this call.
        }
    }
}

pub(super) fn post_recovery(tcb: &mut TcpControlBlock, ccv: &mut CcVar) {
    if tcb.in_fastrecovery() {
        let inflight = seq_diff(tcb.snd_max, ccv.curack);
        if inflight < tcb.snd_ssthresh as i64 {
            tcb.snd_cwnd = (inflight.max(0) as u32) + tcb.t_maxseg;
        } else {
            tcb.snd_cwnd = tcb.snd_ssthresh;
        }
    }
}

impl CongestionAlgorithm for NewReno {
    fn name(&self) -> &'static str {
        "newreno"
    }

    fn ack_received(
        &self,
        tcb: &mut TcpControlBlock,
        ccv: &mut CcVar,
        _data: &mut AlgoData,
        tunables: &Tunables,
        kind: AckType,
    ) {
        ack_received(tcb, ccv, tunables, kind);
    }

    fn cong_signal(
        &self,
        tcb: &mut TcpControlBlock,
        ccv: &mut CcVar,
        _data: &mut AlgoData,
        _tunables: &Tunables,
        signal: CongSignal,
    ) {
        cong_signal(tcb, ccv, signal);
    }

    fn post_recovery(&self, tcb: &mut TcpControlBlock, ccv: &mut CcVar, _data: &mut AlgoData) {
        post_recovery(tcb, ccv);
    }

    fn after_idle(&self, tcb: &mut TcpControlBlock, tunables: &Tunables) {
        after_idle(tcb, tunables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables_no_abc() -> Tunables {
        Tunables {
            rfc3465: false,
            ..Tunables::default()
        }
    }

    fn tunables_abc() -> Tunables {
        Tunables {
            rfc3465: true,
            ..Tunables::default()
        }
    }

    fn base_tcb(maxseg: u32) -> TcpControlBlock {
        TcpControlBlock {
            snd_cwnd: maxseg,
            snd_ssthresh: 16 * maxseg,
            snd_wnd: 64 * maxseg,
            snd_max: 1000,
            snd_nxt: 1000,
            t_maxseg: maxseg,
            ..Default::default()
        }
    }

    #[test]
    fn slow_start_grows_by_one_maxseg_without_abc() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        let mut ccv = CcVar {
            bytes_this_ack: maxseg,
            flags: CcFlags::CWND_LIMITED,
            curack: 0,
        };
        ack_received(&mut tcb, &mut ccv, &tunables_no_abc(), AckType::Ack);
        assert_eq!(tcb.snd_cwnd, 2 * maxseg);
    }

    #[test]
    fn slow_start_grows_by_bytes_acked_with_abc() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        let mut ccv = CcVar {
            bytes_this_ack: maxseg,
            flags: CcFlags::CWND_LIMITED,
            curack: 0,
        };
        ack_received(&mut tcb, &mut ccv, &tunables_abc(), AckType::Ack);
        assert_eq!(tcb.snd_cwnd, 2 * maxseg);
    }

    #[test]
    fn fast_recovery_entry_halves_cwnd_into_ssthresh() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        tcb.snd_cwnd = 20 * maxseg;
        let mut ccv = CcVar::default();
        cong_signal(&mut tcb, &mut ccv, CongSignal::NDupAck);
        assert_eq!(tcb.snd_ssthresh, 10 * maxseg);
        assert!(tcb.in_fastrecovery());
    }

    #[test]
    fn congestion_avoidance_does_not_grow_without_full_window_acked() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        tcb.snd_cwnd = 20 * maxseg;
        tcb.snd_ssthresh = 10 * maxseg;
        let mut ccv = CcVar {
            flags: CcFlags::CWND_LIMITED,
            ..Default::default()
        };
        let before = tcb.snd_cwnd;
        ack_received(&mut tcb, &mut ccv, &tunables_abc(), AckType::Ack);
        assert_eq!(tcb.snd_cwnd, before);
    }

    #[test]
    fn post_recovery_caps_cwnd_at_ssthresh_when_inflight_large() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        tcb.enter_fastrecovery();
        tcb.snd_ssthresh = 10 * maxseg;
        tcb.snd_max = 100_000;
        let ccv = CcVar {
            curack: 0,
            ..Default::default()
        };
        let mut ccv = ccv;
        post_recovery(&mut tcb, &mut ccv);
        assert_eq!(tcb.snd_cwnd, tcb.snd_ssthresh);
    }

    #[test]
    fn after_idle_shrinks_to_restart_window() {
        let maxseg = 1460;
        let mut tcb = base_tcb(maxseg);
        tcb.snd_cwnd = 50 * maxseg;
        after_idle(&mut tcb, &Tunables::default());
        assert!(tcb.snd_cwnd <= 4380.max(2 * maxseg));
    }
}
