//! Protocol implementation module
//!
//! This module defines MSP wire frames, the resumable frame codec, the
//! message code table, the Huffman expander used by dataflash reads and the
//! request lifecycle types.

pub mod codec;
pub mod frame;
pub mod huffman;
pub mod message;
pub mod state;

pub use self::codec::MspCodec;
pub use self::frame::{Direction, Frame, Generation};
pub use self::huffman::{HuffmanTree, Symbol};
pub use self::state::{RequestId, RequestInfo, RequestState};
