pub mod add;
pub mod cancel;
pub mod pause;
pub mod remove;
pub mod resume;
pub mod retry;
pub mod run;
pub mod status;
