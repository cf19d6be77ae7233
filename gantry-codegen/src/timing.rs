//! Pass timing.
//!
//! Every pass marks its extent with a scope guard: `let _tt = timing::spilling();`. The time
//! spent in each pass accumulates in a thread-local table that the enclosing driver can take
//! and print. Nested scopes only charge the innermost pass.

use core::fmt;
use std::cell::RefCell;
use std::time::{Duration, Instant};

// Declare the passes. Each gets a constructor function returning a scope guard, and a slot in
// the accumulated table.
macro_rules! define_passes {
    ($($name:ident: $desc:expr,)+) => {
        /// A timed pass identifier.
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        enum Pass {
            $($name,)+
            None,
        }

        const NUM_PASSES: usize = Pass::None as usize;

        const DESCRIPTIONS: [&str; NUM_PASSES] = [$($desc,)+];

        $(
            /// Start timing this pass; the returned guard charges it until dropped.
            pub fn $name() -> TimingToken {
                start_pass(Pass::$name)
            }
        )+
    };
}

define_passes! {
    flowgraph: "Control flow graph",
    domtree: "Dominator tree",
    liveness: "Liveness analysis",
    schedule: "List scheduling",
    spilling: "Belady spilling",
    spill_materialize: "Spill materialization",
    constraints: "Constraint handling",
    coloring: "Chordal coloring",
    verifier: "Verifier",
    compile: "Whole pipeline",
}

/// A timing scope guard, returned by the per-pass constructor functions.
pub struct TimingToken {
    started: Instant,
    prev: Pass,
}

/// Accumulated time per pass. `total` includes time spent in nested passes; the display
/// subtracts it out so every millisecond is charged once.
#[derive(Clone, Default)]
pub struct PassTimes {
    total: [Duration; NUM_PASSES],
    child: [Duration; NUM_PASSES],
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "======== ==========================")?;
        for (idx, desc) in DESCRIPTIONS.iter().enumerate() {
            let time = self.total[idx]
                .checked_sub(self.child[idx])
                .unwrap_or_default();
            if time != Duration::default() {
                writeln!(
                    f,
                    "{:4}.{:03} {}",
                    time.as_secs(),
                    time.subsec_millis(),
                    desc
                )?;
            }
        }
        writeln!(f, "======== ==========================")
    }
}

thread_local! {
    static CURRENT_PASS: RefCell<Pass> = RefCell::new(Pass::None);
    static PASS_TIME: RefCell<PassTimes> = RefCell::new(Default::default());
}

fn start_pass(pass: Pass) -> TimingToken {
    let prev = CURRENT_PASS.with(|p| p.replace(pass));
    TimingToken {
        started: Instant::now(),
        prev,
    }
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let pass = CURRENT_PASS.with(|p| p.replace(self.prev));
        debug_assert_ne!(pass, Pass::None, "timing token dropped twice");
        let elapsed = self.started.elapsed();
        PASS_TIME.with(|t| {
            let mut table = t.borrow_mut();
            table.total[pass as usize] += elapsed;
            if self.prev != Pass::None {
                table.child[self.prev as usize] += elapsed;
            }
        });
    }
}

/// Take the accumulated pass timings of this thread and reset them.
pub fn take_current() -> PassTimes {
    PASS_TIME.with(|t| t.replace(Default::default()))
}
