//! HTTP clients for the remote stem-separation service.
//!
//! One client per remote operation (credential broker, direct upload, job
//! launcher, status query), each validating the response shape at the
//! boundary and failing with its own typed error. [`backend::HttpBackend`]
//! bundles them behind the [`backend::SeparationBackend`] trait consumed
//! by the orchestration pipeline.

pub mod backend;
pub mod broker;
pub mod config;
pub mod downloads;
pub mod launcher;
pub mod status;
pub mod transfer;

mod http;
