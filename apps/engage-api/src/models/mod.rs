pub mod engagement;
pub mod session;
