//! Behavioural suites for the replite server.

mod support;
