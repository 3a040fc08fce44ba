pub mod mimetype;
pub mod scanner;
pub mod source;
