//! zv-vault: server-side lifecycle of stored envelopes
//!
//! The server never sees keys or filenames. It stores opaque envelopes and a
//! record per file, and enforces who may manage a file (master tokens), how
//! often it may be fetched (burn, disposable tokens), and how long it lives
//! (expiry, retention sweeps).

pub mod deniability;
pub mod ids;
pub mod store;
pub mod sweeper;
pub mod tokens;
pub mod vault;

pub use deniability::DeniabilityLayer;
pub use store::{Claim, StoreCounts, VaultMetadataStore};
pub use sweeper::{RetentionSweeper, SweepReport};
pub use tokens::{DisposableGrant, HealOutcome, TokenAuthority};
pub use vault::{BurnTicket, Download, UploadOptions, UploadReceipt, Vault};
