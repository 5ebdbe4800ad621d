pub mod decoders;
pub mod imap_client;
pub mod normalize;
pub mod search;
pub mod session;
