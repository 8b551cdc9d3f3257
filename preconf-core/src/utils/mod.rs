pub mod decay;
pub mod retry;
pub mod shutdown;
