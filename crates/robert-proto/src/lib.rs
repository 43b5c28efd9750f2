//! ROBERT wire protocol
//!
//! Request and response bodies exchanged with the ROBERT server, with their
//! literal JSON field names. The server is not owned by this codebase, so the
//! exact field set of every body is part of the contract.
//!
//! # Encodings
//!
//! - Bodies are JSON objects with camelCase field names
//! - Binary values (keys, EBIDs, MACs, times) are standard base64 strings
//! - Times are NTP seconds; `time` fields carry the low 32 bits big-endian
//! - `contactsAsBinary` is base64 of the CBOR encoding of the contact list
//!
//! # Components
//!
//! - [`requests`]: bodies the client sends
//! - [`responses`]: bodies the server returns
//! - [`contacts`]: per-reception contact records and their two encodings
//! - [`tuples`]: decrypted epoch material
//! - [`time`]: NTP/Unix conversion

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod contacts;
mod error;
pub mod requests;
pub mod responses;
pub mod time;
pub mod tuples;

pub use codec::{b64_decode, b64_decode_exact, b64_encode, decode, encode};
pub use contacts::{Contact, ContactEncoding, ContactId, ContactPayload};
pub use error::ProtoError;
pub use requests::{
    DeleteExposureHistoryRequest, RegisterRequest, ReportRequest, StatusRequest,
    UnregisterRequest,
};
pub use responses::{RegisterResponse, StatusResponse, SuccessResponse};
pub use tuples::{EpochKey, EpochTuple};
