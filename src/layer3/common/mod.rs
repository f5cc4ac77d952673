// Layer3 Common Module - shared containers for the feature readers

pub mod time_windows;

pub use time_windows::{MidSample, TimeWindow, Timestamped};
