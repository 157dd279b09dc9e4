pub mod aggregate;
pub mod cities;
pub mod ownership;
