/// Tracing subscriber setup with TTY and rotated file output.
pub mod loggerlocal;
