//! Settings controlling the backend pipeline.
//!
//! Flags are set by the enclosing driver before compilation; the pipeline itself never reads
//! the environment. Build them with `builder()`:
//!
//! ```
//! use gantry_codegen::settings::{self, SelectorStrategy};
//!
//! let mut b = settings::builder();
//! b.set_selector(SelectorStrategy::Pressure);
//! b.enable_verifier(true);
//! let flags = settings::Flags::new(b);
//! assert!(flags.enable_verifier());
//! ```

/// The list scheduler strategy to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorStrategy {
    /// Always pick the first ready node.
    Trivial,
    /// Pick pseudo-randomly among the ready nodes.
    Random,
    /// Greedily minimize register pressure.
    Pressure,
}

/// A builder for `Flags`.
#[derive(Clone)]
pub struct Builder {
    selector: SelectorStrategy,
    enable_verifier: bool,
    random_seed: u64,
}

impl Builder {
    /// Choose the scheduling selector.
    pub fn set_selector(&mut self, selector: SelectorStrategy) {
        self.selector = selector;
    }

    /// Run the verifier between pipeline stages.
    pub fn enable_verifier(&mut self, enable: bool) {
        self.enable_verifier = enable;
    }

    /// Seed for the random selector.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.random_seed = seed;
    }
}

/// Create a flags builder with default values.
pub fn builder() -> Builder {
    Builder {
        selector: SelectorStrategy::Pressure,
        enable_verifier: false,
        random_seed: 1,
    }
}

/// Flags accepted by the backend pipeline.
#[derive(Clone)]
pub struct Flags {
    selector: SelectorStrategy,
    enable_verifier: bool,
    random_seed: u64,
}

impl Flags {
    /// Create flags from a builder.
    pub fn new(builder: Builder) -> Self {
        Self {
            selector: builder.selector,
            enable_verifier: builder.enable_verifier,
            random_seed: builder.random_seed,
        }
    }

    /// The configured scheduling selector.
    pub fn selector(&self) -> SelectorStrategy {
        self.selector
    }

    /// Is the inter-stage verifier enabled?
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }

    /// The seed of the random selector.
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new(builder())
    }
}
