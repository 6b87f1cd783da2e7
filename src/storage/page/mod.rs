mod error;
mod tmp_tuple_page;
mod tuple_page;

pub use error::PageError;
pub use tmp_tuple_page::TmpTuplePage;
pub use tuple_page::TuplePage;
