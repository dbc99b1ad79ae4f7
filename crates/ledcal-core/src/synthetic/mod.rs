//! Deterministic synthetic data for tests and demos.
//!
//! - LED strands wound on a helix inside the calibration volume,
//! - ring rigs with small deterministic pose errors,
//! - forward-projected detection tables in the same shape the loader produces,
//! - seeded noise that does not depend on an RNG implementation.
//!
//! # Example
//!
//! ```no_run
//! use ledcal_core::{synthetic::strand, ImageSize, Intrinsics, RingLayout};
//!
//! let leds = strand::helix(&strand::HelixSpec::new(50));
//! let cameras = RingLayout::new(8).seed_all();
//! let tables = strand::project_detections(
//!     &Intrinsics::new(2800.0),
//!     &cameras,
//!     &leds,
//!     ImageSize::default(),
//!     None,
//! );
//! assert_eq!(tables.len(), 8);
//! ```

pub mod noise;
pub mod strand;
