pub mod hook;
pub mod init;
pub mod serve;
