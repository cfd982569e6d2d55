// Xeryon XD piezo stage driver with a zenoh host runtime

pub mod config;
pub mod messages;
pub mod runtime;
pub mod xd;
