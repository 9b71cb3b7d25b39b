pub mod analytics;
pub mod assistant;
pub mod bot;
pub mod config;
pub mod tempfiles;

#[cfg(test)]
pub(crate) mod testing;
