mod auth;
mod health_check;

pub use auth::{
    check_email, check_phone, client_config, login, logout, profile, refresh, register,
};
pub use health_check::health_check;
