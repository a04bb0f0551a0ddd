//! HTTP route handlers. Health and metrics come from `common::http`.

pub mod transfers;
