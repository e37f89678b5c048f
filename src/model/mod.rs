mod document;
mod object;

pub use document::Document;
pub use object::{Dictionary, Object, ObjectId, Stream, StringFormat};
