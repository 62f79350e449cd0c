mod executor;
pub mod handshake;
mod time;

pub use executor::*;
pub use time::*;

/// Wait for `n` clock cycles inside a simulated task.
#[macro_export]
macro_rules! cycle {
    ($n: expr) => {
        $crate::Executor::current()
            .resolve_at($crate::Cycles::new($n as u64))
            .await
    };
}
