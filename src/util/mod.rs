pub mod crypto;
pub mod fs;
