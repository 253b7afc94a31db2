//! Tandem wire protocol
//!
//! Newline-delimited JSON messages exchanged between clients and the
//! authoritative server.
//!
//! ## Client messages
//! ```text
//! {"Join":"pad:1"}                                  # raw TCP only, first frame
//! {"Edit":{"revision":3,"operation":[2,"hi",-1]}}   # positive = retain, negative = delete
//! {"SetLanguage":"rust"}
//! {"ClientInfo":{"name":"Alice","hue":120}}
//! {"CursorData":{"cursors":[4],"selections":[]}}
//! ```
//!
//! ## Server messages
//! ```text
//! {"Identity":7}
//! {"History":{"revision":4,"operation":[5,"x"],"author":7,"checksum":"ab12.."}}
//! {"Language":{"language":"rust","author":7}}
//! {"UserInfo":{"id":7,"info":{"name":"Alice","hue":120}}}   # info null = left
//! {"UserCursor":{"id":7,"data":{"cursors":[4],"selections":[]}}}
//! ```

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{check_frame_size, decode, encode, Parser, MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ClientMsg, ServerMsg};
