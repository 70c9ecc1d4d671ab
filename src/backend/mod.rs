pub mod api;
pub mod cache;

#[cfg(test)]
pub mod mock;
