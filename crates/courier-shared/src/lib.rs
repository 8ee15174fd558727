//! # courier-shared
//!
//! Types shared by the Courier server and its clients: identifier newtypes,
//! group roles, the request/response/push wire protocol and the
//! newline-delimited JSON codec that frames it.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::JsonLinesCodec;
pub use error::ProtocolError;
