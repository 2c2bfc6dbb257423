#![doc(html_root_url = "https://docs.rs/kestrel-compiler-core/")]

extern crate alloc;

pub mod bytecode;
pub mod value;

pub use ruff_source_file::{
    LineIndex, OneIndexed, PositionEncoding, SourceFile, SourceFileBuilder, SourceLocation,
};
pub use value::{CallSiteInfo, Symbol, Value};
