pub mod auth;
pub mod feature;
pub mod ledger;
pub mod run;

pub use auth::{login, logout, status};
pub use feature::{
    disable as disable_feature, enable as enable_feature, status as feature_status,
};
pub use ledger::{clear as clear_ledger, show as show_ledger};
pub use run::{run, tick};
