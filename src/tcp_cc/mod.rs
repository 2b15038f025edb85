//! Pluggable TCP congestion-control framework (C3): NewReno is always
//! available and is the default; CUBIC is offered alongside it.
//!
//! An algorithm is a vtable of optional hooks (see [`CongestionAlgorithm`]),
//! looked up by name from a process-wide, read-only registry populated once
//! at first use. The framework functions (`cc_*`) implement the bookkeeping
//! shared by every algorithm — ABC byte counting, initial-window policy,
//! recovery-state bookkeeping, spurious-RTO recovery — before dispatching to
//! the selected algorithm's hook, mirroring the host stack's own wrapper
//! functions around its per-algorithm callback table.

pub mod cubic;
pub mod newreno;
pub mod tcb;

use hashbrown::HashMap;
use lazy_static::lazy_static;

pub use cubic::Cubic;
pub use newreno::NewReno;
pub use tcb::{AckType, CcFlags, CcVar, CongSignal, TFlags, TcpControlBlock, Tunables};
use tcb::seq_diff;
use system_error::NetCoreError;

/// Algorithm-private per-connection state. NewReno needs none; CUBIC keeps
/// its epoch bookkeeping here rather than in a separately-allocated block,
/// since this crate has no connection hostcache to amortize the allocation
/// across (the source's `pool_get`/`pool_put` pairing around `cc_data`).
pub enum AlgoData {
    None,
    Cubic(cubic::CubicState),
}

/// One pluggable congestion-control algorithm.
///
/// Every hook has a default no-op implementation except the two every
/// algorithm must define: `name` and `ack_received`/`cong_signal` are the
/// only hooks that actually change window behavior, so they're left
/// non-defaulted to force every implementor to consider them.
pub trait CongestionAlgorithm: Sync {
    fn name(&self) -> &'static str;

    /// One-time per-connection private-state setup (`cb_init`).
    fn cb_init(&self, _tcb: &TcpControlBlock, _tunables: &Tunables, _data: &mut AlgoData) {}

    /// Initialize variables for a newly established connection, after the
    /// framework has already picked the initial `snd_cwnd`.
    fn conn_init(&self, _tcb: &mut TcpControlBlock, _ccv: &mut CcVar, _data: &mut AlgoData) {}

    fn ack_received(
        &self,
        tcb: &mut TcpControlBlock,
        ccv: &mut CcVar,
        data: &mut AlgoData,
        tunables: &Tunables,
        kind: AckType,
    );

    fn cong_signal(
        &self,
        tcb: &mut TcpControlBlock,
        ccv: &mut CcVar,
        data: &mut AlgoData,
        tunables: &Tunables,
        signal: CongSignal,
    );

    fn post_recovery(&self, _tcb: &mut TcpControlBlock, _ccv: &mut CcVar, _data: &mut AlgoData) {}

    /// Default: delegate to NewReno's restart-window policy. Only CUBIC in
    /// this crate uses the default; it has no distinct after-idle policy of
    /// its own (the source assigns `tcp_cubic_cc.after_idle` from
    /// `tcp_newreno_cc.after_idle` in its `init` hook).
    fn after_idle(&self, tcb: &mut TcpControlBlock, tunables: &Tunables) {
        newreno::after_idle(tcb, tunables);
    }
}

static NEWRENO: NewReno = NewReno;
static CUBIC: Cubic = Cubic;

lazy_static! {
    /// Read-only after construction: every algorithm this crate ships is
    /// registered exactly once, the first time any lookup forces this
    /// `lazy_static` to initialize. `lazy_static`'s own one-time-init guard
    /// is what the design notes' "protect the registry like other
    /// read-mostly global tables" calls for, since no runtime
    /// `register()` API is needed once start-up registration is complete.
    static ref REGISTRY: HashMap<&'static str, &'static dyn CongestionAlgorithm> = {
        let mut m = HashMap::new();
        m.insert(NEWRENO.name(), &NEWRENO as &dyn CongestionAlgorithm);
        m.insert(CUBIC.name(), &CUBIC as &dyn CongestionAlgorithm);
        log::debug!("tcp_cc: registered {} congestion control algorithms", m.len());
        m
    };
}

/// The algorithm selected for new connections that don't request one by name.
pub const DEFAULT_ALGORITHM: &str = "newreno";

/// Look up a registered algorithm by name (`"newreno"`, `"cubic"`).
pub fn lookup_algorithm(name: &str) -> Option<&'static dyn CongestionAlgorithm> {
    REGISTRY.get(name).copied()
}

fn assert_cwnd_floor(tcb: &TcpControlBlock) {
    debug_assert!(
        tcb.snd_cwnd >= tcb.t_maxseg,
        "snd_cwnd fell below one segment outside the RTO path"
    );
}

/// `cc_ack_received`: shared ABC bookkeeping, then dispatch to the
/// algorithm's `ack_received`.
pub fn cc_ack_received(
    tcb: &mut TcpControlBlock,
    ccv: &mut CcVar,
    algorithm: &dyn CongestionAlgorithm,
    data: &mut AlgoData,
    tunables: &Tunables,
    ack: u32,
    kind: AckType,
) {
    ccv.bytes_this_ack = seq_diff(ack, tcb.snd_una).max(0) as u32;
    if tcb.snd_cwnd <= tcb.snd_wnd {
        ccv.flags.insert(CcFlags::CWND_LIMITED);
    } else {
        ccv.flags.remove(CcFlags::CWND_LIMITED);
    }

    if kind == AckType::Ack {
        if tcb.snd_cwnd > tcb.snd_ssthresh {
            let capped = core::cmp::min(ccv.bytes_this_ack, tunables.abc_limit * tcb.t_maxseg);
            tcb.t_bytes_acked = tcb.t_bytes_acked.saturating_add(capped);
            if tcb.t_bytes_acked >= tcb.snd_cwnd {
                tcb.t_bytes_acked -= tcb.snd_cwnd;
                ccv.flags.insert(CcFlags::ABC_SENTAWND);
            }
        } else {
            ccv.flags.remove(CcFlags::ABC_SENTAWND);
            tcb.t_bytes_acked = 0;
        }
    }

    ccv.curack = ack;
    algorithm.ack_received(tcb, ccv, data, tunables, kind);
    assert_cwnd_floor(tcb);
}

/// `cc_conn_init`: pick the initial `snd_cwnd` per RFC 5681/3390/6928
/// policy, then dispatch to the algorithm's `conn_init`.
pub fn cc_conn_init(
    tcb: &mut TcpControlBlock,
    ccv: &mut CcVar,
    algorithm: &dyn CongestionAlgorithm,
    data: &mut AlgoData,
    tunables: &Tunables,
) {
    let maxseg = tcb.t_maxseg;
    tcb.snd_cwnd = if tcb.snd_cwnd == 1 {
        // A SYN or SYN/ACK was lost and retransmitted: be conservative.
        maxseg
    } else if tunables.rfc3390_mode == 2 {
        core::cmp::min(10 * maxseg, core::cmp::max(2 * maxseg, 14600))
    } else if tunables.rfc3390_mode == 1 {
        core::cmp::min(4 * maxseg, core::cmp::max(2 * maxseg, 4380))
    } else if maxseg > 2190 {
        2 * maxseg
    } else if maxseg > 1095 {
        3 * maxseg
    } else {
        4 * maxseg
    };

    algorithm.conn_init(tcb, ccv, data);
    assert_cwnd_floor(tcb);
}

/// `cc_cong_signal`: shared recovery-state transitions for each signal
/// type, then dispatch to the algorithm's `cong_signal`.
pub fn cc_cong_signal(
    tcb: &mut TcpControlBlock,
    ccv: &mut CcVar,
    algorithm: &dyn CongestionAlgorithm,
    data: &mut AlgoData,
    tunables: &Tunables,
    signal: CongSignal,
) {
    match signal {
        CongSignal::NDupAck => {
            if !tcb.in_fastrecovery() {
                tcb.snd_last = tcb.snd_max;
                if tcb.t_flags.contains(TFlags::ECN_PERMIT) {
                    tcb.t_flags.insert(TFlags::SEND_CWR);
                }
            }
        }
        CongSignal::Ecn => {
            if !tcb.in_congrecovery() {
                tcb.snd_last = tcb.snd_max;
                if tcb.t_flags.contains(TFlags::ECN_PERMIT) {
                    tcb.t_flags.insert(TFlags::SEND_CWR);
                }
            }
        }
        CongSignal::Rto => {
            let maxseg = tcb.t_maxseg;
            tcb.t_dupacks = 0;
            tcb.t_bytes_acked = 0;
            tcb.exit_recovery();
            tcb.snd_ssthresh =
                core::cmp::max(2, core::cmp::min(tcb.snd_wnd, tcb.snd_cwnd) / 2 / maxseg) * maxseg;
            tcb.snd_cwnd = maxseg;
            log::debug!("tcp_cc: RTO, ssthresh={} cwnd={}", tcb.snd_ssthresh, tcb.snd_cwnd);
        }
        CongSignal::RtoErr => {
            tcb.snd_cwnd = tcb.snd_cwnd_prev;
            tcb.snd_ssthresh = tcb.snd_ssthresh_prev;
            tcb.snd_last = tcb.snd_last_prev;
            if tcb.t_flags.contains(TFlags::WAS_FRECOVERY) {
                tcb.enter_fastrecovery();
            }
            if tcb.t_flags.contains(TFlags::WAS_CRECOVERY) {
                tcb.enter_congrecovery();
            }
            tcb.snd_nxt = tcb.snd_max;
            tcb.t_flags.remove(TFlags::PREVVALID);
            tcb.t_badrxtwin = 0;
            log::debug!("tcp_cc: spurious RTO reverted, cwnd restored to {}", tcb.snd_cwnd);
        }
    }

    algorithm.cong_signal(tcb, ccv, data, tunables, signal);
    assert_cwnd_floor(tcb);
}

/// `cc_post_recovery`: dispatch to the algorithm, then clear the shared ABC
/// accumulator.
pub fn cc_post_recovery(
    tcb: &mut TcpControlBlock,
    ccv: &mut CcVar,
    algorithm: &dyn CongestionAlgorithm,
    data: &mut AlgoData,
) {
    algorithm.post_recovery(tcb, ccv, data);
    tcb.t_bytes_acked = 0;
    assert_cwnd_floor(tcb);
}

/// `cc_after_idle`: dispatch to the algorithm's restart-window policy.
pub fn cc_after_idle(tcb: &mut TcpControlBlock, algorithm: &dyn CongestionAlgorithm, tunables: &Tunables) {
    algorithm.after_idle(tcb, tunables);
    assert_cwnd_floor(tcb);
}

/// A convenience bundle of everything one TCP connection needs to drive
/// this framework: the selected algorithm, its private state, and the
/// `ccvar` scratch. The control-block view itself stays external (owned by
/// the caller's TCB), matching §3's "the core reads/writes only the listed
/// fields" contract.
pub struct Connection {
    algorithm: &'static dyn CongestionAlgorithm,
    data: AlgoData,
    pub ccv: CcVar,
}

impl Connection {
    /// Select `name` (or fail with [`NetCoreError::EINVAL`] if unknown) and
    /// run `cb_init` + `cc_conn_init` for a freshly established connection.
    pub fn new(
        name: &str,
        tcb: &mut TcpControlBlock,
        tunables: &Tunables,
    ) -> Result<Self, NetCoreError> {
        let algorithm = lookup_algorithm(name).ok_or(NetCoreError::EINVAL)?;
        let mut data = AlgoData::None;
        algorithm.cb_init(tcb, tunables, &mut data);
        let mut ccv = CcVar::default();
        cc_conn_init(tcb, &mut ccv, algorithm, &mut data, tunables);
        Ok(Connection { algorithm, data, ccv })
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn ack_received(&mut self, tcb: &mut TcpControlBlock, tunables: &Tunables, ack: u32, kind: AckType) {
        cc_ack_received(tcb, &mut self.ccv, self.algorithm, &mut self.data, tunables, ack, kind);
    }

    pub fn cong_signal(&mut self, tcb: &mut TcpControlBlock, tunables: &Tunables, signal: CongSignal) {
        cc_cong_signal(tcb, &mut self.ccv, self.algorithm, &mut self.data, tunables, signal);
    }

    pub fn post_recovery(&mut self, tcb: &mut TcpControlBlock) {
        cc_post_recovery(tcb, &mut self.ccv, self.algorithm, &mut self.data);
    }

    pub fn after_idle(&mut self, tcb: &mut TcpControlBlock, tunables: &Tunables) {
        cc_after_idle(tcb, self.algorithm, tunables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb(maxseg: u32) -> TcpControlBlock {
        TcpControlBlock {
            snd_cwnd: 1,
            snd_wnd: 64 * maxseg,
            snd_max: 0,
            snd_nxt: 0,
            t_maxseg: maxseg,
            ..Default::default()
        }
    }

    #[test]
    fn unknown_algorithm_name_is_rejected() {
        let mut tcb = tcb(1460);
        let err = Connection::new("vegas", &mut tcb, &Tunables::default()).unwrap_err();
        assert_eq!(err, NetCoreError::EINVAL);
    }

    #[test]
    fn default_registry_contains_newreno_and_cubic() {
        assert!(lookup_algorithm("newreno").is_some());
        assert!(lookup_algorithm("cubic").is_some());
    }

    #[test]
    fn conn_init_applies_rfc3390_initial_window() {
        let mut tcb = tcb(1460);
        let tunables = Tunables {
            rfc3390_mode: 1,
            ..Tunables::default()
        };
        let conn = Connection::new("newreno", &mut tcb, &tunables).unwrap();
        assert_eq!(conn.algorithm_name(), "newreno");
        assert_eq!(tcb.snd_cwnd, core::cmp::min(4 * 1460, core::cmp::max(2 * 1460, 4380)));
    }

    #[test]
    fn rto_cong_signal_sets_cwnd_to_exactly_one_segment() {
        let mut tcb = tcb(1460);
        let tunables = Tunables::default();
        let mut conn = Connection::new("newreno", &mut tcb, &tunables).unwrap();
        tcb.snd_cwnd = 40 * 1460;
        conn.cong_signal(&mut tcb, &tunables, CongSignal::Rto);
        assert_eq!(tcb.snd_cwnd, 1460);
    }

    #[test]
    fn rto_err_restores_previous_window() {
        let mut tcb = tcb(1460);
        let tunables = Tunables::default();
        let mut conn = Connection::new("newreno", &mut tcb, &tunables).unwrap();
        tcb.snd_cwnd_prev = 12 * 1460;
        tcb.snd_ssthresh_prev = 6 * 1460;
        conn.cong_signal(&mut tcb, &tunables, CongSignal::RtoErr);
        assert_eq!(tcb.snd_cwnd, 12 * 1460);
        assert_eq!(tcb.snd_ssthresh, 6 * 1460);
    }
}
