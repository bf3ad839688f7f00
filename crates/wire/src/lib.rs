// SPDX-License-Identifier: MIT

//! Launcher wire protocol.
//!
//! Wire format: 4-byte length prefix (big-endian) + UTF-8 JSON payload.
//! Every message carries an integer `messageType` and a `requestId`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod error;
mod request;
mod response;

pub use codec::{
    encode, read_message, write_message, MessageCodec, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE,
    MESSAGE_HEADER_SIZE,
};
pub use error::ErrorCode;
pub use request::{
    parse_request, ControlOperation, JobFilters, JobTarget, OutputType, Request, RequestError,
    RequestScope, Version,
};
pub use response::{ClusterInfo, NetworkInfo, OutputKind, Response, StreamSequence};
