mod block_page;
mod codec;
mod header_page;
mod table;

pub use block_page::HashBlockPage;
pub use codec::SlotValue;
pub use header_page::HashHeaderPage;
pub use table::{HashTableError, LinearProbeHashTable};
