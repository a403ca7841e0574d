pub mod agreement;
pub mod anchor;
pub mod cid;
pub mod fingerprint;
pub mod intent;
pub mod keys;
pub mod lifecycle;
pub mod otp;
pub mod session;
pub mod workflow;
