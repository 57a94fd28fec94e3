//! SMC calling convention (SMCCC) 64-bit calls into the secure monitor.

use crate::on_target;

/// Register file passed to and returned from an SMC.
///
/// `reg[0]` carries the function id on entry and the status on return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmcParams {
    pub reg: [u64; 8],
}

impl SmcParams {
    pub const fn new(function_id: u32) -> Self {
        let mut reg = [0; 8];
        reg[0] = function_id as u64;
        Self { reg }
    }
}

/// Anything able to issue a secure monitor call.
///
/// The loader talks to the trusted OS through this so tests can record
/// calls instead of trapping to EL3.
pub trait SecureMonitor {
    /// Issue the call; results replace `params.reg`.
    fn call(&mut self, params: &mut SmcParams);
}

/// The real EL3 monitor.
#[derive(Debug, Default)]
pub struct Smc;

impl SecureMonitor for Smc {
    fn call(&mut self, params: &mut SmcParams) {
        send_smc64(params);
    }
}

/// Issue an SMC64 with `x0..x7` from `params`, writing `x0..x7` back.
pub fn send_smc64(params: &mut SmcParams) {
    let _r = &mut params.reg;
    on_target!(
        "smc #0",
        inout("x0") _r[0],
        inout("x1") _r[1],
        inout("x2") _r[2],
        inout("x3") _r[3],
        inout("x4") _r[4],
        inout("x5") _r[5],
        inout("x6") _r[6],
        inout("x7") _r[7],
        clobber_abi("C"),
        options(nostack)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_id_in_x0() {
        let p = SmcParams::new(0xBC00_000C);
        assert_eq!(p.reg[0], 0xBC00_000C);
        assert!(p.reg[1..].iter().all(|&r| r == 0));
    }
}
