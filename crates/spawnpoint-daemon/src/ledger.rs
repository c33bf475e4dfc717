//! Resource accounting.
//!
//! One lock guards the available counters; reservations and releases are
//! the only mutations. Between atomic sections, `available + Σ(live
//! reservations) == total` for both memory and CPU shares.

use std::sync::Mutex;

use thiserror::Error;

/// A `(memory, cpu)` pair accounted against the host's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub mem_mib: u64,
    pub cpu_shares: u64,
}

impl Reservation {
    pub const ZERO: Reservation = Reservation {
        mem_mib: 0,
        cpu_shares: 0,
    };
}

/// Admission rejections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReserveError {
    #[error("insufficient memory: requested {requested} MiB, available {available} MiB")]
    InsufficientMem { requested: u64, available: u64 },

    #[error("insufficient cpu shares: requested {requested}, available {available}")]
    InsufficientCpu { requested: u64, available: u64 },
}

/// Tracks available memory and CPU shares against fixed totals.
pub struct ResourceLedger {
    total: Reservation,
    available: Mutex<Reservation>,
}

impl ResourceLedger {
    pub fn new(total: Reservation) -> Self {
        Self {
            total,
            available: Mutex::new(total),
        }
    }

    pub fn total(&self) -> Reservation {
        self.total
    }

    pub fn available(&self) -> Reservation {
        *self.available.lock().expect("ledger lock poisoned")
    }

    /// Atomically admit a reservation.
    ///
    /// `replacing` is the reservation of a service being redeployed under
    /// the same name: only the net delta is checked and applied, so a
    /// same-size redeploy succeeds even with zero headroom. Both checks
    /// pass before either counter moves.
    pub fn reserve(
        &self,
        request: Reservation,
        replacing: Option<Reservation>,
    ) -> Result<(), ReserveError> {
        let replacing = replacing.unwrap_or(Reservation::ZERO);
        let mut available = self.available.lock().expect("ledger lock poisoned");

        let mem_headroom = available.mem_mib + replacing.mem_mib;
        let cpu_headroom = available.cpu_shares + replacing.cpu_shares;
        if request.mem_mib > mem_headroom {
            return Err(ReserveError::InsufficientMem {
                requested: request.mem_mib,
                available: mem_headroom,
            });
        }
        if request.cpu_shares > cpu_headroom {
            return Err(ReserveError::InsufficientCpu {
                requested: request.cpu_shares,
                available: cpu_headroom,
            });
        }

        available.mem_mib = mem_headroom - request.mem_mib;
        available.cpu_shares = cpu_headroom - request.cpu_shares;
        Ok(())
    }

    /// Return a reservation to the pool. Must be called exactly once per
    /// successful reserve.
    pub fn release(&self, reservation: Reservation) {
        let mut available = self.available.lock().expect("ledger lock poisoned");
        available.mem_mib += reservation.mem_mib;
        available.cpu_shares += reservation.cpu_shares;
        debug_assert!(available.mem_mib <= self.total.mem_mib);
        debug_assert!(available.cpu_shares <= self.total.cpu_shares);
    }
}
