pub mod catalog;
pub mod config;
pub mod feed;
pub mod media;
pub mod reconcile;
pub mod store;
pub mod sync;

pub mod util {
    pub mod env;
}
