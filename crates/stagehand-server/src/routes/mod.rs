pub mod events;
pub mod health;
pub mod toggles;
pub mod units;
