//! RESP codec: values, a resumable decoder and an async frame stream.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Resumable decoder for incoming RESP data
//! - `stream`: Pull-based sequence of decoded values over an async reader
//!
//! ## Example
//!
//! ```
//! use memkv::protocol::{decode_all, RespValue};
//! use bytes::Bytes;
//!
//! // Decoding incoming data
//! let values = decode_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(values[0], RespValue::command(["GET", "name"]));
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("memkv"));
//! assert_eq!(response.serialize(), b"$5\r\nmemkv\r\n");
//! ```

pub mod parser;
pub mod stream;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_all, ParseError, ParseResult, RespDecoder};
pub use stream::RespStream;
pub use types::RespValue;
