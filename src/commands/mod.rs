pub mod decision;
pub mod init;
pub mod instance;
pub mod lock;
pub mod status;
