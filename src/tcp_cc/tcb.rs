//! The slice of a TCP control block the congestion-control framework reads
//! and writes, plus the per-connection `ccvar` scratch the algorithms share.
//!
//! Neither type owns a socket, a retransmit timer, or anything else outside
//! congestion control; the framework's contract is deliberately narrow (§3).

use bitflags::bitflags;

bitflags! {
    /// `t_flags` bits the CC framework itself reads or writes. A real TCB
    /// carries many more (delayed-ack, SACK permitted, ...) that never touch
    /// this subsystem and so aren't modelled here.
    #[derive(Default)]
    pub struct TFlags: u32 {
        /// Peer negotiated ECN for this connection.
        const ECN_PERMIT    = 0x0001;
        /// Next outgoing segment should carry CWR.
        const SEND_CWR      = 0x0002;
        /// We were in fast recovery when a (possibly spurious) RTO fired.
        const WAS_FRECOVERY = 0x0004;
        /// We were in congestion recovery when a (possibly spurious) RTO fired.
        const WAS_CRECOVERY = 0x0008;
        /// `snd_cwnd_prev`/`snd_ssthresh_prev`/`snd_last_prev` hold a valid
        /// pre-RTO snapshot, restorable on `RtoErr`.
        const PREVVALID     = 0x0010;
        /// Currently inside TCP NewReno fast recovery.
        const FASTRECOVERY  = 0x0020;
        /// Currently inside (ECN) congestion recovery.
        const CONGRECOVERY  = 0x0040;
    }
}

bitflags! {
    /// Per-ack `ccvar` flags (`CCF_*` in the source).
    #[derive(Default)]
    pub struct CcFlags: u16 {
        /// ABC has already counted a full cwnd's worth of acked bytes this
        /// round trip.
        const ABC_SENTAWND = 0x0001;
        /// `snd_cwnd <= snd_wnd`: the sender, not the receiver, currently
        /// bounds how much may be outstanding.
        const CWND_LIMITED = 0x0002;
    }
}

/// `ack_received` hook discriminant (`CC_ACK`/`CC_DUPACK`/...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// A regular, in-sequence ACK.
    Ack,
    /// A duplicate ACK.
    DupAck,
}

/// `cong_signal` hook discriminant (`CC_NDUPACK`/`CC_ECN`/...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongSignal {
    /// Dup-ACK threshold reached: enter fast recovery.
    NDupAck,
    /// An ECN-marked segment arrived.
    Ecn,
    /// The retransmit timer fired.
    Rto,
    /// A previously-declared RTO is now known to have been spurious.
    RtoErr,
}

/// Environment tunables the framework consults (`sysctl`-backed globals in
/// the source; an explicit, caller-constructed value here per §10.4).
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// `tcp_do_rfc3390`: 0 = RFC 5681 initial window, 1 = RFC 3390, 2 = RFC 6928.
    pub rfc3390_mode: u8,
    /// `tcp_do_rfc3465`: Appropriate Byte Counting.
    pub rfc3465: bool,
    /// `tcp_abc_limit`: max segments credited per ACK under ABC slow start.
    pub abc_limit: u32,
    /// `tcprexmtthresh`: dup-ACK count that triggers fast retransmit. Read by
    /// callers outside this crate; never written here.
    pub tcprexmtthresh: u32,
    /// `hz`: clock ticks per second, used by CUBIC's RTT bookkeeping.
    pub hz: u32,
    /// `TCP_MAXWIN`: largest representable unscaled window.
    pub tcp_maxwin: u32,
    /// `TCPTV_SRTTBASE`: sentinel "no sample yet" value for smoothed RTT.
    pub tcptv_srttbase: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            rfc3390_mode: 1,
            rfc3465: true,
            abc_limit: 2,
            tcprexmtthresh: 3,
            hz: 1000,
            tcp_maxwin: 65535,
            tcptv_srttbase: i32::MAX as u32,
        }
    }
}

/// The congestion-relevant slice of a TCP control block.
///
/// Sequence-space fields (`snd_*` other than `snd_scale`) are plain `u32`
/// counters advanced by the owning TCP stack; this framework never wraps
/// them itself, it only ever takes differences via [`seq_diff`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpControlBlock {
    pub snd_cwnd: u32,
    pub snd_ssthresh: u32,
    pub snd_wnd: u32,
    pub snd_max: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_scale: u32,
    pub snd_last: u32,
    pub snd_last_prev: u32,
    pub snd_cwnd_prev: u32,
    pub snd_ssthresh_prev: u32,

    pub t_maxseg: u32,
    pub t_dupacks: u32,
    pub t_bytes_acked: u32,
    pub t_rxtshift: u32,
    pub t_flags: TFlags,
    pub t_srtt: u32,
    pub t_rttupdated: u32,
    pub t_badrxtwin: u32,
    pub t_now: u32,
}

impl TcpControlBlock {
    pub fn in_fastrecovery(&self) -> bool {
        self.t_flags.contains(TFlags::FASTRECOVERY)
    }

    pub fn in_congrecovery(&self) -> bool {
        self.t_flags.contains(TFlags::CONGRECOVERY)
    }

    pub fn in_recovery(&self) -> bool {
        self.in_fastrecovery() || self.in_congrecovery()
    }

    pub fn enter_fastrecovery(&mut self) {
        self.t_flags.insert(TFlags::FASTRECOVERY);
    }

    pub fn enter_congrecovery(&mut self) {
        self.t_flags.insert(TFlags::CONGRECOVERY);
    }

    pub fn enter_recovery(&mut self) {
        self.t_flags.insert(TFlags::FASTRECOVERY | TFlags::CONGRECOVERY);
    }

    pub fn exit_recovery(&mut self) {
        self.t_flags.remove(TFlags::FASTRECOVERY | TFlags::CONGRECOVERY);
    }
}

/// Per-connection congestion-control scratch (`struct tcp_ccvar`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CcVar {
    pub bytes_this_ack: u32,
    pub flags: CcFlags,
    pub curack: u32,
}

/// Signed sequence-space difference `a - b`, matching the source's
/// `tcp_seq_subtract` (sequence numbers wrap mod 2^32; plain `u32`
/// subtraction would misbehave across a wrap).
pub fn seq_diff(a: u32, b: u32) -> i64 {
    (a.wrapping_sub(b) as i32) as i64
}
