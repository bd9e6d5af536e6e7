pub mod check;
pub mod cli;
