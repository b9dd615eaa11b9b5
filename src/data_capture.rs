pub mod decoder;
pub mod row_codec;
pub mod types;

pub use decoder::decode_payload;
pub use row_codec::{encode_row, render_record};
pub use types::{CellValue, InboundMessage, OutputRow};
