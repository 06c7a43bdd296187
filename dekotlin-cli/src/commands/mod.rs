pub mod check;
pub mod common;
pub mod convert;
pub mod inspect;
