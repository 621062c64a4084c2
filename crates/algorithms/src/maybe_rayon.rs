//! Row-parallel iteration that degrades to plain iterators.
//!
//! Kernels call `into_par_iter()` unconditionally; without the `parallel`
//! feature the call resolves to `into_iter()` and the chain runs sequentially
//! with identical output.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
pub use sequential::IntoParallelIterator;

#[cfg(not(feature = "parallel"))]
mod sequential {
    pub trait IntoParallelIterator: IntoIterator + Sized {
        fn into_par_iter(self) -> Self::IntoIter {
            self.into_iter()
        }
    }

    impl<I: IntoIterator> IntoParallelIterator for I {}
}
