pub mod health;
pub mod public_assets;
pub mod uploads;
