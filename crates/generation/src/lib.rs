//! Client for the external Generation Service.
//!
//! [`messages`] holds the wire types (request, dispatch response, inbound
//! callback); [`client`] holds the [`GenerationClient`] seam and its
//! reqwest-backed implementation.

pub mod client;
pub mod messages;

pub use client::{GenerationApiError, GenerationClient, HttpGenerationClient};
pub use messages::{
    CallbackPayload, CallbackResult, DispatchOutcome, DispatchResponse, GenerationRequest,
};
