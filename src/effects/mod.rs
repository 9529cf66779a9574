// src/effects/mod.rs

pub mod tone_filter;

pub use tone_filter::{FilterParams, FilterType, ToneFilter};
