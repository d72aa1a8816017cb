pub mod trace;

pub use trace::format_failure_trace;
