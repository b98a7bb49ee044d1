pub mod execution;
pub mod question;
pub mod response;
pub mod sql;
pub mod turn;
