//! Codec module - value model and binary serialization.
//!
//! - [`Variant`] - the dynamically typed value carried in message arguments
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//!
//! # Design
//!
//! Every message travels as one `Variant` tree. The codec is a marker struct
//! with static methods, so nothing is allocated per connection.
//!
//! # Example
//!
//! ```
//! use debugwire::codec::{MsgPackCodec, Variant};
//!
//! let encoded = MsgPackCodec::encode(&Variant::from("hello")).unwrap();
//! let decoded: Variant = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.as_str(), Some("hello"));
//! ```

mod msgpack;
mod variant;

pub use msgpack::MsgPackCodec;
pub use variant::Variant;
