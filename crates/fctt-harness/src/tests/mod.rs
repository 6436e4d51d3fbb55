//! Behavioural suites for the harness library.
