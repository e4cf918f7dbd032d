pub mod github;
pub mod metrics;
pub mod qris;
pub mod voucher;

pub use github::GithubStore;
pub use self::metrics::{get_metrics, init_metrics, record_promo_applied};
pub use qris::QrisClient;
