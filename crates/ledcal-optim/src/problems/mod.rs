//! Problem builders producing backend-agnostic IR.

pub mod led_bundle;
