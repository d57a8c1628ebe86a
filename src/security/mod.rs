pub mod secret;

pub use secret::UpdateKey;
