//! zv-storage: OpenDAL blob storage for ciphertext envelopes

pub mod blobs;
pub mod health;
pub mod operator;

pub use blobs::BlobStore;
pub use health::check_health;
pub use operator::build_fs_operator;
